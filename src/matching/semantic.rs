//! Reasoning-service components of the semantic path: category pre-filter, binary
//! relevance gate and tiered scorer. Each one owns its fallback, so callers never see
//! a service error.

use crate::core::types::{MarketRecord, QueryContext, ScoredCandidate, Tier};
use crate::llm::{PromptId, Reasoner};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, info, warn};

// ----------- Category selection -----------------

#[derive(Debug, Clone, PartialEq)]
pub struct CategorySelection {
    pub categories: Vec<String>,
    pub reasoning: String,
    /// Selection failed and every category was kept.
    pub fell_back: bool,
}

#[derive(Debug, Deserialize)]
struct RawCategorySelection {
    selected_categories: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

pub struct CategorySelector {
    reasoner: Reasoner,
}

impl CategorySelector {
    pub fn new(reasoner: Reasoner) -> Self {
        Self { reasoner }
    }

    /// Narrow `all_categories` to those likely to hold a match. Fails open: on any error,
    /// or when nothing usable comes back, every category is kept.
    pub async fn select_categories(&self, query: &str, all_categories: &[String]) -> CategorySelection {
        let fail_open = |reason: String| CategorySelection {
            categories: all_categories.to_vec(),
            reasoning: reason,
            fell_back: true,
        };

        let raw: RawCategorySelection = match self
            .reasoner
            .call(
                PromptId::CategorySelection,
                json!({ "query": query, "available_categories": all_categories }),
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "category selection failed; keeping all categories");
                return fail_open(format!("category selection unavailable ({}), including all", e));
            }
        };

        // Map answers back onto the known names; the service may change case or invent names.
        let known: HashMap<String, &String> = all_categories
            .iter()
            .map(|c| (c.trim().to_lowercase(), c))
            .collect();
        let mut categories: Vec<String> = Vec::new();
        for answer in &raw.selected_categories {
            if let Some(name) = known.get(&answer.trim().to_lowercase()) {
                if !categories.contains(name) {
                    categories.push((*name).clone());
                }
            } else {
                debug!(category = %answer, "ignoring unknown category from selector");
            }
        }

        if categories.is_empty() {
            warn!(
                answered = ?raw.selected_categories,
                "category selector returned no known category; keeping all categories"
            );
            return fail_open("no known category selected, including all".to_string());
        }

        info!(
            selected = categories.len(),
            available = all_categories.len(),
            "categories selected"
        );
        CategorySelection {
            categories,
            reasoning: raw.reasoning,
            fell_back: false,
        }
    }
}

// ----------- Relevance gate -----------------

/// Inputs of the per-item prompts; the query context rides along when there is one.
fn item_inputs(query: &str, title: &str, context: Option<&QueryContext>) -> Value {
    let mut inputs = json!({ "query": query, "market_title": title });
    if let Some(ctx) = context.filter(|c| !c.is_empty()) {
        inputs["query_context"] = json!(ctx);
    }
    inputs
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub relevant: bool,
    pub matched_keywords: Vec<String>,
    /// The check itself failed and `relevant` is the conservative default.
    pub degraded: bool,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    is_relevant: bool,
    #[serde(default)]
    keywords_matched: Vec<String>,
}

pub struct RelevanceVerifier {
    reasoner: Reasoner,
}

impl RelevanceVerifier {
    pub fn new(reasoner: Reasoner) -> Self {
        Self { reasoner }
    }

    /// Strict binary gate. Errors exclude the candidate.
    pub async fn is_relevant(
        &self,
        query: &str,
        title: &str,
        context: Option<&QueryContext>,
    ) -> Verdict {
        match self
            .reasoner
            .call::<RawVerdict>(PromptId::RelevanceCheck, item_inputs(query, title, context))
            .await
        {
            Ok(raw) => Verdict {
                relevant: raw.is_relevant,
                matched_keywords: raw.keywords_matched,
                degraded: false,
            },
            Err(e) => {
                warn!(error = %e, title, "relevance check failed; excluding candidate");
                Verdict {
                    relevant: false,
                    matched_keywords: Vec::new(),
                    degraded: true,
                }
            }
        }
    }
}

// ----------- Tiered scoring -----------------

#[derive(Debug, Clone, PartialEq)]
pub struct TierScore {
    pub tier: Tier,
    pub score: f64,
    pub reasoning: String,
    pub degraded: bool,
}

impl TierScore {
    pub fn scoring_error(reason: &str) -> Self {
        Self {
            tier: Tier::Low,
            score: 0.1,
            reasoning: format!("scoring error: {}", reason),
            degraded: true,
        }
    }
}

/// Trust the tier label over the raw number: anything outside the band moves to the
/// band midpoint.
pub fn clamp_to_band(tier: Tier, raw: f64) -> f64 {
    if raw.is_finite() && tier.contains(raw) {
        raw
    } else {
        tier.midpoint()
    }
}

/// Tier label plus score as returned by the service, before clamping.
pub(crate) fn tier_score_from_raw(
    tier_label: &str,
    score: f64,
    reasoning: String,
) -> Result<TierScore, String> {
    let tier = Tier::parse(tier_label).ok_or_else(|| format!("unknown tier '{}'", tier_label))?;
    let clamped = clamp_to_band(tier, score);
    if clamped != score {
        debug!(%tier, raw = score, clamped, "score outside tier band");
    }
    Ok(TierScore {
        tier,
        score: clamped,
        reasoning,
        degraded: false,
    })
}

#[derive(Debug, Deserialize)]
struct RawTierScore {
    relevance_tier: String,
    score: f64,
    #[serde(default)]
    reasoning: String,
}

pub struct TieredScorer {
    reasoner: Reasoner,
}

impl TieredScorer {
    pub fn new(reasoner: Reasoner) -> Self {
        Self { reasoner }
    }

    /// Never drops the candidate: errors come back as LOW/0.1.
    pub async fn score(&self, query: &str, title: &str, context: Option<&QueryContext>) -> TierScore {
        let raw = match self
            .reasoner
            .call::<RawTierScore>(PromptId::TieredScoring, item_inputs(query, title, context))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, title, "tiered scoring failed");
                return TierScore::scoring_error(&e.to_string());
            }
        };

        match tier_score_from_raw(&raw.relevance_tier, raw.score, raw.reasoning) {
            Ok(s) => s,
            Err(reason) => {
                warn!(%reason, title, "tiered scoring returned an unusable tier");
                TierScore::scoring_error(&reason)
            }
        }
    }
}

// ----------- Candidate construction -----------------

pub(crate) fn relevant_candidate(
    market: &MarketRecord,
    scored: TierScore,
    matched_keywords: Vec<String>,
) -> ScoredCandidate {
    ScoredCandidate {
        market: market.clone(),
        score: scored.score,
        tier: Some(scored.tier),
        reasoning: scored.reasoning,
        matched_terms: matched_keywords,
        degraded: scored.degraded,
    }
}

pub(crate) fn rejected_candidate(market: &MarketRecord, verdict: Verdict) -> ScoredCandidate {
    let reasoning = if verdict.degraded {
        "relevance check unavailable; excluded".to_string()
    } else {
        "not directly relevant to the query".to_string()
    };
    ScoredCandidate {
        market: market.clone(),
        score: 0.0,
        tier: None,
        reasoning,
        matched_terms: verdict.matched_keywords,
        degraded: verdict.degraded,
    }
}
