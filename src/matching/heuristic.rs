//! Deterministic lexical/temporal relevance scorer.
//!
//! Additive point system over a normalized query and market title. Every term is
//! bounded and the final sum is clamped to [0, 1]; missing market fields skip their term.

use crate::config::config::HeuristicWeights;
use crate::config::lexicon::CompiledLexicon;
use crate::core::types::{MarketRecord, QueryContext, ScoredCandidate};
use crate::matching::temporal::TemporalQualifier;
use crate::matching::tokenization::TokenizedText;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Per-term breakdown, kept for reasoning strings and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreComponents {
    pub exact_substring: f64,
    pub phrases: f64,
    pub overlap: f64,
    pub overlap_ratio: f64,
    pub temporal: f64,
    pub synonyms: f64,
    pub categories: f64,
    pub similarity: f64,
    pub short_query_penalized: bool,
    pub short_title: f64,
    pub active: f64,
}

#[derive(Debug, Clone)]
pub struct HeuristicScore {
    pub score: f64,
    pub components: ScoreComponents,
    pub matched_terms: Vec<String>,
}

/// Query side of the scorer, computed once per matching call.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    text: TokenizedText,
    /// Query plus context entities; used only for synonym and category lookups.
    lookup: TokenizedText,
    temporal: Option<TemporalQualifier>,
}

impl PreparedQuery {
    pub fn temporal(&self) -> Option<TemporalQualifier> {
        self.temporal
    }
}

pub struct HeuristicScorer {
    weights: HeuristicWeights,
    lexicon: Arc<CompiledLexicon>,
}

impl HeuristicScorer {
    pub fn new(weights: HeuristicWeights, lexicon: Arc<CompiledLexicon>) -> Self {
        Self { weights, lexicon }
    }

    pub fn prepare(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        now: DateTime<Utc>,
    ) -> PreparedQuery {
        let text = TokenizedText::new(query);

        let (lookup, qualifier) = match context {
            Some(ctx) if !ctx.is_empty() => {
                let lookup = if ctx.entities.is_empty() {
                    text.clone()
                } else {
                    TokenizedText::new(&format!("{} {}", query, ctx.entities.join(" ")))
                };
                let qualifier = ctx.temporal_qualifier.as_deref().map(TokenizedText::new);
                (lookup, qualifier)
            }
            _ => (text.clone(), None),
        };

        let temporal = match &qualifier {
            Some(q) => TemporalQualifier::classify(&[&text, q], &self.lexicon, now),
            None => TemporalQualifier::classify(&[&text], &self.lexicon, now),
        };

        PreparedQuery {
            text,
            lookup,
            temporal,
        }
    }

    /// `score(query, market, now) -> [0, 1]`.
    pub fn score(&self, query: &str, market: &MarketRecord, now: DateTime<Utc>) -> f64 {
        let prepared = self.prepare(query, None, now);
        self.score_prepared(&prepared, market).score
    }

    /// Score every market, in input order.
    pub fn score_all(&self, prepared: &PreparedQuery, markets: &[MarketRecord]) -> Vec<ScoredCandidate> {
        markets
            .iter()
            .map(|m| {
                let s = self.score_prepared(prepared, m);
                ScoredCandidate {
                    market: m.clone(),
                    score: s.score,
                    tier: None,
                    reasoning: describe(&s.components),
                    matched_terms: s.matched_terms,
                    degraded: false,
                }
            })
            .collect()
    }

    pub fn score_prepared(&self, q: &PreparedQuery, market: &MarketRecord) -> HeuristicScore {
        let w = &self.weights;
        let title = TokenizedText::new(&market.title);
        let mut c = ScoreComponents::default();
        let mut matched: BTreeSet<String> = BTreeSet::new();

        // 1. Exact substring
        if !q.text.normalized().is_empty() && title.normalized().contains(q.text.normalized()) {
            c.exact_substring = w.exact_substring;
        }

        // 2. Curated phrases present on both sides
        let phrases = &self.lexicon.phrases;
        let title_phrases = phrases.matches(&title);
        for idx in phrases.matches(&q.text) {
            if title_phrases.binary_search(&idx).is_ok() {
                c.phrases += w.phrase;
                matched.insert(phrases.phrase(idx).to_string());
            }
        }

        // 3. Token overlap
        let query_tokens = q.text.unique();
        if !query_tokens.is_empty() {
            let shared: Vec<&String> = query_tokens.intersection(title.unique()).collect();
            let ratio = shared.len() as f64 / query_tokens.len() as f64;
            c.overlap_ratio = ratio;
            c.overlap = if query_tokens.len() > 2 && ratio < w.overlap_low_ratio {
                ratio * w.overlap_low
            } else {
                ratio * w.overlap_high
            };
            if shared.len() >= w.multi_match_min {
                c.overlap += w.multi_match_bonus;
            }
            matched.extend(shared.into_iter().cloned());
        }

        // 4. Temporal qualifier vs resolution month
        if let (Some(qualifier), Some(end)) = (q.temporal, market.end_date) {
            c.temporal = qualifier.term(end, w);
        }

        // 5. Synonyms
        let mut synonym_bonus = 0.0;
        for idx in self.lexicon.synonym_terms.matches(&q.lookup) {
            let alternatives = &self.lexicon.synonym_alternatives[idx];
            for alt in alternatives.matches(&title) {
                synonym_bonus += w.synonym_hit;
                matched.insert(alternatives.phrase(alt).to_string());
            }
        }
        c.synonyms = synonym_bonus.min(w.synonym_cap);

        // 6. Category expectations
        if let Some(category) = market.category.as_deref() {
            let category = category.to_lowercase();
            let mut category_bonus = 0.0;
            for idx in self.lexicon.category_terms.matches(&q.lookup) {
                for expected in &self.lexicon.category_expectations[idx] {
                    if category.contains(expected.as_str()) {
                        category_bonus += w.category_hit;
                    }
                }
            }
            c.categories = category_bonus.min(w.category_cap);
        }

        // 7. Edit-distance similarity
        let similarity = levenshtein_ratio(q.text.normalized(), title.normalized());
        if similarity > w.similarity_threshold {
            c.similarity = similarity * w.similarity_factor;
        }

        let mut score = c.exact_substring
            + c.phrases
            + c.overlap
            + c.temporal
            + c.synonyms
            + c.categories
            + c.similarity;

        // 8. Short, mostly unmatched queries
        if query_tokens.len() <= w.short_query_tokens && c.overlap_ratio < w.overlap_low_ratio {
            score *= w.short_query_factor;
            c.short_query_penalized = true;
        }

        // 9. Short titles
        if title.unique().len() < w.short_title_tokens {
            c.short_title = w.short_title_bonus;
            score += c.short_title;
        }

        // 10. Active markets
        if market.active {
            c.active = w.active_bonus;
            score += c.active;
        }

        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };

        HeuristicScore {
            score,
            components: c,
            matched_terms: matched.into_iter().collect(),
        }
    }
}

fn describe(c: &ScoreComponents) -> String {
    let mut parts = Vec::new();
    if c.exact_substring > 0.0 {
        parts.push("exact query match in title".to_string());
    }
    if c.phrases > 0.0 {
        parts.push(format!("shared phrases +{:.2}", c.phrases));
    }
    if c.overlap_ratio > 0.0 {
        parts.push(format!("keyword overlap {:.0}%", c.overlap_ratio * 100.0));
    }
    if c.temporal != 0.0 {
        parts.push(format!("timeframe {:+.2}", c.temporal));
    }
    if c.synonyms > 0.0 {
        parts.push(format!("synonyms +{:.2}", c.synonyms));
    }
    if c.categories > 0.0 {
        parts.push(format!("category +{:.2}", c.categories));
    }
    if c.short_query_penalized {
        parts.push("short query with weak overlap".to_string());
    }
    if parts.is_empty() {
        return "no lexical signal".to_string();
    }
    parts.join("; ")
}

/// 1 - levenshtein(a, b) / max(len(a), len(b)) over chars; 0 when either side is empty.
fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    let max_len = a.len().max(b.len());
    1.0 - prev[b.len()] as f64 / max_len as f64
}
