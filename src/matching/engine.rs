//! `MatchEngine`: the one public matching operation and the strategy plumbing behind it.

use crate::catalog::CatalogSource;
use crate::config::config::{AppCfg, MatchingCfg};
use crate::config::lexicon::LexiconHandle;
use crate::core::errors::MatchError;
use crate::core::types::{
    MarketRecord, MatchOptions, MatchOutcome, MatchResult, QueryContext, ScoredCandidate, Strategy,
};
use crate::llm::Reasoner;
use crate::llm::client::OpenAiReasoningService;
use crate::matching::batch::BatchScoringOrchestrator;
use crate::matching::context::QueryContextExtractor;
use crate::matching::heuristic::HeuristicScorer;
use crate::matching::selector::MatchSelector;
use crate::matching::semantic::{CategorySelector, Verdict, rejected_candidate};
use anyhow::Result;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

struct SemanticRun {
    scored: Vec<ScoredCandidate>,
    category_reasoning: Option<String>,
    /// Candidates the service actually judged, as opposed to error fallbacks.
    judged: usize,
}

pub struct MatchEngine {
    lexicon: LexiconHandle,
    reasoner: Option<Reasoner>,
    cfg: MatchingCfg,
}

impl MatchEngine {
    /// `reasoner = None` leaves only the heuristic path; semantic requests degrade to it.
    pub fn new(lexicon: LexiconHandle, reasoner: Option<Reasoner>, cfg: MatchingCfg) -> Self {
        Self {
            lexicon,
            reasoner,
            cfg,
        }
    }

    /// Build from loaded application config: lexicon file if configured, OpenAI-compatible
    /// client when an API key is present.
    pub fn from_config(app: &AppCfg) -> Result<Self> {
        let lexicon = match &app.matching.lexicon_path {
            Some(path) => LexiconHandle::from_file(path)?,
            None => LexiconHandle::default(),
        };

        let reasoner = if app.llm.api_key.is_empty() {
            if app.matching.strategy != Strategy::Heuristic {
                warn!(
                    strategy = ?app.matching.strategy,
                    "no llm.apiKey configured; semantic matching will fall back to heuristic"
                );
            }
            None
        } else {
            let service = OpenAiReasoningService::new(app.llm.clone());
            info!(model = %service.model(), "reasoning service configured");
            Some(Reasoner::new(Arc::new(service), app.matching.call_timeout))
        };

        Ok(Self::new(lexicon, reasoner, app.matching.clone()))
    }

    pub fn lexicon(&self) -> &LexiconHandle {
        &self.lexicon
    }

    /// Options taken from the `matching` config section.
    pub fn default_options(&self) -> MatchOptions {
        MatchOptions {
            top_k: self.cfg.top_k,
            min_confidence: self.cfg.min_confidence,
            strategy: self.cfg.strategy,
            reference_time: None,
        }
    }

    /// Match a query against the supplied candidates. Never fails: service problems
    /// degrade the strategy, and an empty candidate set is reported as
    /// `MatchOutcome::NoCandidates`.
    pub async fn match_query(
        &self,
        query: &str,
        candidates: &[MarketRecord],
        options: &MatchOptions,
    ) -> MatchResult {
        let span = info_span!(
            "match_query",
            query_len = query.len(),
            candidates = candidates.len(),
            strategy = ?options.strategy
        );
        self.run(query, candidates, options).instrument(span).await
    }

    /// Fetch candidates from a catalog, then match. Only the fetch can fail.
    pub async fn match_from_catalog(
        &self,
        query: &str,
        catalog: &dyn CatalogSource,
        filter_hint: Option<&str>,
        limit: usize,
        options: &MatchOptions,
    ) -> Result<MatchResult, MatchError> {
        let candidates = catalog
            .fetch_candidates(filter_hint, limit)
            .await
            .inspect_err(|e| error!(error = %e, "candidate supply failed"))?;
        Ok(self.match_query(query, &candidates, options).await)
    }

    async fn run(&self, query: &str, candidates: &[MarketRecord], options: &MatchOptions) -> MatchResult {
        let candidates = sanitize(candidates);
        info!(state = "RECEIVED", usable = candidates.len(), "match started");

        if candidates.is_empty() {
            info!("no candidates supplied");
            return MatchSelector::select(
                query,
                Vec::new(),
                options.top_k,
                options.min_confidence,
                options.strategy,
            );
        }

        let now = options.reference_time.unwrap_or_else(Utc::now);
        let context = self.context_for(query, options.strategy).await;

        let scorer = HeuristicScorer::new(self.cfg.weights.clone(), self.lexicon.snapshot());
        let prepared = scorer.prepare(query, context.as_ref(), now);

        let (scored, strategy_used, category_reasoning) = match options.strategy {
            Strategy::Heuristic => (scorer.score_all(&prepared, &candidates), Strategy::Heuristic, None),
            Strategy::Semantic => match self.semantic_within_deadline(query, context.as_ref(), &candidates).await {
                Some(run) => (run.scored, Strategy::Semantic, run.category_reasoning),
                None => (scorer.score_all(&prepared, &candidates), Strategy::Heuristic, None),
            },
            Strategy::Mixed => {
                let heuristic = scorer.score_all(&prepared, &candidates);
                match self.semantic_within_deadline(query, context.as_ref(), &candidates).await {
                    Some(run) => (
                        merge_scores(heuristic, &run.scored, self.cfg.mixed_semantic_weight),
                        Strategy::Mixed,
                        run.category_reasoning,
                    ),
                    None => (heuristic, Strategy::Heuristic, None),
                }
            }
        };
        info!(
            state = "CANDIDATES_SCORED",
            scored = scored.len(),
            strategy_used = ?strategy_used,
            "candidates scored"
        );

        let mut result = MatchSelector::select(
            query,
            scored,
            options.top_k,
            options.min_confidence,
            strategy_used,
        );
        result.category_reasoning = category_reasoning;

        match result.outcome {
            MatchOutcome::Matched => info!(
                state = "SELECTED",
                best_score = ?result.best_score,
                best = result.best().map(|c| c.market.id.as_str()).unwrap_or_default(),
                returned = result.candidates.len(),
                "match selected"
            ),
            MatchOutcome::NoConfidentMatch => info!(
                state = "REJECTED_LOW_CONFIDENCE",
                best_score = ?result.best_score,
                min_confidence = options.min_confidence,
                "no confident match"
            ),
            MatchOutcome::NoCandidates => info!("no candidates left to select from"),
        }
        result
    }

    async fn context_for(&self, query: &str, strategy: Strategy) -> Option<QueryContext> {
        if strategy == Strategy::Heuristic || !self.cfg.extract_context {
            return None;
        }
        let reasoner = self.reasoner.as_ref()?;
        let context = QueryContextExtractor::new(reasoner.clone()).extract(query).await;
        info!(
            state = "CONTEXT_EXTRACTED",
            entities = context.entities.len(),
            temporal = ?context.temporal_qualifier,
            "query context extracted"
        );
        (!context.is_empty()).then_some(context)
    }

    /// `None` when the semantic path is unavailable, misses its deadline or judged nothing.
    async fn semantic_within_deadline(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        candidates: &[MarketRecord],
    ) -> Option<SemanticRun> {
        let Some(reasoner) = &self.reasoner else {
            warn!("no reasoning service configured; degrading to heuristic");
            return None;
        };

        match tokio::time::timeout(
            self.cfg.semantic_deadline,
            self.semantic(reasoner, query, context, candidates),
        )
        .await
        {
            Ok(run) if run.judged == 0 => {
                warn!(
                    candidates = candidates.len(),
                    "reasoning service judged no candidate; degrading to heuristic"
                );
                None
            }
            Ok(run) => Some(run),
            Err(_) => {
                warn!(
                    deadline = ?self.cfg.semantic_deadline,
                    "semantic matching missed its deadline; degrading to heuristic"
                );
                None
            }
        }
    }

    /// Category pre-filter, then batch verification and tiered scoring of the survivors.
    /// Candidates filtered out by category come back as rejections so every input keeps
    /// exactly one entry.
    async fn semantic(
        &self,
        reasoner: &Reasoner,
        query: &str,
        context: Option<&QueryContext>,
        candidates: &[MarketRecord],
    ) -> SemanticRun {
        let categories = distinct_categories(candidates);
        let (selected, category_reasoning) = if categories.len() > 1 {
            let selection = CategorySelector::new(reasoner.clone())
                .select_categories(query, &categories)
                .await;
            let selected: HashSet<String> =
                selection.categories.iter().map(|c| c.to_lowercase()).collect();
            (Some(selected), Some(selection.reasoning))
        } else {
            (None, None)
        };

        let in_scope = |m: &MarketRecord| match (&selected, &m.category) {
            (Some(sel), Some(cat)) => sel.contains(&cat.trim().to_lowercase()),
            _ => true,
        };
        let survivors: Vec<MarketRecord> =
            candidates.iter().filter(|&m| in_scope(m)).cloned().collect();
        info!(
            candidates = candidates.len(),
            survivors = survivors.len(),
            "category filter applied"
        );

        let scored = BatchScoringOrchestrator::new(reasoner.clone(), &self.cfg)
            .score_all(query, context, &survivors)
            .await;
        let judged = scored.iter().filter(|s| !s.degraded).count();
        let mut by_id: HashMap<String, ScoredCandidate> =
            scored.into_iter().map(|s| (s.market.id.clone(), s)).collect();

        let scored = candidates
            .iter()
            .map(|m| {
                by_id.remove(&m.id).unwrap_or_else(|| {
                    let mut c = rejected_candidate(
                        m,
                        Verdict {
                            relevant: false,
                            matched_keywords: Vec::new(),
                            degraded: false,
                        },
                    );
                    c.reasoning = "category not selected".to_string();
                    c
                })
            })
            .collect();

        SemanticRun {
            scored,
            category_reasoning,
            judged,
        }
    }
}

/// Collapse duplicate ids (first wins) and drop records without a title.
fn sanitize(candidates: &[MarketRecord]) -> Vec<MarketRecord> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(candidates.len());
    let mut out = Vec::with_capacity(candidates.len());
    for m in candidates {
        if m.title.trim().is_empty() {
            warn!(id = %m.id, "skipping candidate with empty title");
            continue;
        }
        if !seen.insert(m.id.as_str()) {
            warn!(id = %m.id, "skipping duplicate candidate id");
            continue;
        }
        out.push(m.clone());
    }
    out
}

fn distinct_categories(candidates: &[MarketRecord]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    candidates
        .iter()
        .filter_map(|m| m.category.as_deref())
        .map(str::trim)
        .filter(|c| !c.is_empty() && seen.insert(c.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// MIXED combinator over two independent score sets, keyed by market id. Semantic
/// scores that came from a fallback do not count; those candidates keep their heuristic
/// score.
pub fn merge_scores(
    heuristic: Vec<ScoredCandidate>,
    semantic: &[ScoredCandidate],
    semantic_weight: f64,
) -> Vec<ScoredCandidate> {
    let w = semantic_weight.clamp(0.0, 1.0);
    let by_id: HashMap<&str, &ScoredCandidate> =
        semantic.iter().map(|s| (s.market.id.as_str(), s)).collect();

    heuristic
        .into_iter()
        .map(|h| match by_id.get(h.market.id.as_str()) {
            Some(s) if !s.degraded => {
                let mut terms = s.matched_terms.clone();
                for t in &h.matched_terms {
                    if !terms.contains(t) {
                        terms.push(t.clone());
                    }
                }
                ScoredCandidate {
                    score: (w * s.score + (1.0 - w) * h.score).clamp(0.0, 1.0),
                    tier: s.tier,
                    reasoning: format!("{}; heuristic: {}", s.reasoning, h.reasoning),
                    matched_terms: terms,
                    degraded: false,
                    market: h.market,
                }
            }
            Some(_) => ScoredCandidate {
                degraded: true,
                ..h
            },
            None => h,
        })
        .collect()
}
