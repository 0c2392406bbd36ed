//! Bounded-concurrency batch scoring. Candidates are split into fixed-size batches, a
//! small pool of workers scores batches in parallel, and anything a batch leaves
//! unscored is retried one item at a time (relevance gate, then tiered score).

use crate::config::config::MatchingCfg;
use crate::core::types::{MarketRecord, QueryContext, ScoredCandidate};
use crate::llm::{PromptId, Reasoner};
use crate::matching::semantic::{
    RelevanceVerifier, TierScore, TieredScorer, Verdict, rejected_candidate, relevant_candidate,
    tier_score_from_raw,
};
use dashmap::DashMap;
use futures::{StreamExt, stream};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct RawBatch {
    results: Vec<RawBatchItem>,
}

#[derive(Debug, Deserialize)]
struct RawBatchItem {
    id: Value,
    is_relevant: bool,
    #[serde(default)]
    keywords_matched: Vec<String>,
    #[serde(default)]
    relevance_tier: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

impl RawBatchItem {
    /// Ids come back as strings or bare numbers depending on the model.
    fn id(&self) -> Option<String> {
        match &self.id {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub struct BatchScoringOrchestrator {
    reasoner: Reasoner,
    verifier: RelevanceVerifier,
    scorer: TieredScorer,
    batch_size: usize,
    workers: usize,
    item_concurrency: usize,
}

impl BatchScoringOrchestrator {
    pub fn new(reasoner: Reasoner, cfg: &MatchingCfg) -> Self {
        Self {
            verifier: RelevanceVerifier::new(reasoner.clone()),
            scorer: TieredScorer::new(reasoner.clone()),
            reasoner,
            batch_size: cfg.batch_size.max(1),
            workers: cfg.workers.max(1),
            item_concurrency: cfg.item_concurrency.max(1),
        }
    }

    /// Score every candidate. The output holds exactly one entry per input, in input
    /// order; a failing batch or item never takes the others down with it.
    pub async fn score_all(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        candidates: &[MarketRecord],
    ) -> Vec<ScoredCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let results: DashMap<String, ScoredCandidate> = DashMap::with_capacity(candidates.len());
        let batches: Vec<&[MarketRecord]> = candidates.chunks(self.batch_size).collect();
        info!(
            candidates = candidates.len(),
            batches = batches.len(),
            workers = self.workers,
            "batch scoring started"
        );

        stream::iter(batches.into_iter().enumerate())
            .for_each_concurrent(self.workers, |(idx, batch)| {
                let results = &results;
                async move {
                    let missing = self.score_batch(idx, query, context, batch, results).await;
                    if !missing.is_empty() {
                        self.score_individually(query, context, &missing, results).await;
                    }
                }
            })
            .await;

        candidates
            .iter()
            .map(|m| match results.get(&m.id) {
                Some(scored) => scored.clone(),
                None => {
                    warn!(id = %m.id, "no score produced for candidate; using fallback");
                    relevant_candidate(m, TierScore::scoring_error("no result"), Vec::new())
                }
            })
            .collect()
    }

    /// One batch call. Returns the markets the call did not cover.
    async fn score_batch<'a>(
        &self,
        idx: usize,
        query: &str,
        context: Option<&QueryContext>,
        batch: &'a [MarketRecord],
        results: &DashMap<String, ScoredCandidate>,
    ) -> Vec<&'a MarketRecord> {
        let markets: Vec<Value> = batch
            .iter()
            .map(|m| json!({ "id": m.id, "title": m.title, "category": m.category }))
            .collect();
        let mut inputs = json!({ "query": query, "markets": markets });
        if let Some(ctx) = context.filter(|c| !c.is_empty()) {
            inputs["query_context"] = json!(ctx);
        }

        let raw: RawBatch = match self.reasoner.call(PromptId::BatchScoring, inputs).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(batch = idx, size = batch.len(), error = %e, "batch scoring failed; scoring items individually");
                return batch.iter().collect();
            }
        };

        let in_batch: HashSet<&str> = batch.iter().map(|m| m.id.as_str()).collect();
        let mut covered: HashSet<String> = HashSet::new();
        for item in raw.results {
            let Some(id) = item.id() else {
                debug!(batch = idx, "batch result without usable id");
                continue;
            };
            if !in_batch.contains(id.as_str()) || covered.contains(&id) {
                debug!(batch = idx, %id, "ignoring unexpected or repeated batch result");
                continue;
            }
            let Some(market) = batch.iter().find(|m| m.id == id) else {
                continue;
            };

            let scored = if !item.is_relevant {
                rejected_candidate(
                    market,
                    Verdict {
                        relevant: false,
                        matched_keywords: item.keywords_matched,
                        degraded: false,
                    },
                )
            } else {
                let label = item.relevance_tier.as_deref().unwrap_or_default();
                match tier_score_from_raw(label, item.score.unwrap_or(f64::NAN), item.reasoning) {
                    Ok(tier) => relevant_candidate(market, tier, item.keywords_matched),
                    // left uncovered, rescored on the per-item path
                    Err(reason) => {
                        debug!(batch = idx, %id, %reason, "unusable batch result");
                        continue;
                    }
                }
            };
            results.insert(id.clone(), scored);
            covered.insert(id);
        }

        let missing: Vec<&MarketRecord> =
            batch.iter().filter(|m| !covered.contains(&m.id)).collect();
        if !missing.is_empty() {
            warn!(
                batch = idx,
                missing = missing.len(),
                "batch response incomplete; scoring remaining items individually"
            );
        }
        missing
    }

    async fn score_individually(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        markets: &[&MarketRecord],
        results: &DashMap<String, ScoredCandidate>,
    ) {
        let scored: Vec<ScoredCandidate> =
            stream::iter(markets.iter().map(|m| self.score_one(query, context, m)))
            .buffer_unordered(self.item_concurrency)
            .collect()
            .await;
        for s in scored {
            results.insert(s.market.id.clone(), s);
        }
    }

    /// Gate first; only relevant markets reach the tiered scorer.
    pub async fn score_one(
        &self,
        query: &str,
        context: Option<&QueryContext>,
        market: &MarketRecord,
    ) -> ScoredCandidate {
        let verdict = self.verifier.is_relevant(query, &market.title, context).await;
        if !verdict.relevant {
            return rejected_candidate(market, verdict);
        }
        let scored = self.scorer.score(query, &market.title, context).await;
        relevant_candidate(market, scored, verdict.matched_keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ServiceError;
    use crate::core::types::Tier;
    use crate::llm::mock::ScriptedService;
    use std::sync::Arc;
    use std::time::Duration;

    fn markets(n: usize) -> Vec<MarketRecord> {
        (0..n)
            .map(|i| MarketRecord::new(format!("m{}", i), format!("Market number {}", i)))
            .collect()
    }

    fn cfg(batch_size: usize) -> MatchingCfg {
        MatchingCfg {
            batch_size,
            workers: 2,
            item_concurrency: 3,
            ..MatchingCfg::default()
        }
    }

    fn ids_of(inputs: &Value) -> Vec<String> {
        inputs["markets"]
            .as_array()
            .map(|ms| {
                ms.iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn high(id: &str) -> Value {
        json!({"id": id, "is_relevant": true, "keywords_matched": ["market"],
               "relevance_tier": "HIGH", "score": 0.85, "reasoning": "direct"})
    }

    fn individual_handlers(svc: ScriptedService) -> ScriptedService {
        svc.on(PromptId::RelevanceCheck, |_| {
            Ok(json!({"is_relevant": true, "keywords_matched": ["market"]}))
        })
        .on(PromptId::TieredScoring, |_| {
            Ok(json!({"relevance_tier": "MEDIUM", "score": 0.5, "reasoning": "individual"}))
        })
    }

    fn orchestrator(svc: Arc<ScriptedService>, batch_size: usize) -> BatchScoringOrchestrator {
        BatchScoringOrchestrator::new(
            Reasoner::new(svc, Duration::from_millis(500)),
            &cfg(batch_size),
        )
    }

    #[tokio::test]
    async fn test_every_batch_succeeds() {
        let svc = Arc::new(ScriptedService::new().on(PromptId::BatchScoring, |inputs| {
            let results: Vec<Value> = ids_of(inputs).iter().map(|id| high(id)).collect();
            Ok(json!({ "results": results }))
        }));
        let input = markets(7);
        let out = orchestrator(svc.clone(), 3).score_all("market", None, &input).await;

        assert_eq!(out.len(), 7);
        for (m, s) in input.iter().zip(&out) {
            assert_eq!(m.id, s.market.id);
            assert_eq!(s.score, 0.85);
            assert!(s.is_tier(Tier::High));
        }
        assert_eq!(svc.calls(PromptId::BatchScoring), 3);
        assert_eq!(svc.calls(PromptId::RelevanceCheck), 0);
    }

    #[tokio::test]
    async fn test_partial_coverage_rescored_individually() {
        // the batch only answers for even ids, with numeric-looking ids echoed as strings
        let svc = Arc::new(individual_handlers(ScriptedService::new().on(
            PromptId::BatchScoring,
            |inputs| {
                let results: Vec<Value> = ids_of(inputs)
                    .iter()
                    .filter(|id| id.trim_start_matches('m').parse::<usize>().unwrap() % 2 == 0)
                    .map(|id| high(id))
                    .collect();
                Ok(json!({ "results": results }))
            },
        )));
        let input = markets(6);
        let out = orchestrator(svc.clone(), 10).score_all("market", None, &input).await;

        assert_eq!(out.len(), 6);
        assert_eq!(svc.calls(PromptId::RelevanceCheck), 3);
        assert_eq!(svc.calls(PromptId::TieredScoring), 3);
        for (i, s) in out.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(s.score, 0.85);
            } else {
                assert_eq!(s.score, 0.5);
                assert_eq!(s.reasoning, "individual");
            }
        }
    }

    #[tokio::test]
    async fn test_failed_batch_is_contained() {
        let svc = Arc::new(individual_handlers(ScriptedService::new().on(
            PromptId::BatchScoring,
            |inputs| {
                let ids = ids_of(inputs);
                if ids.iter().any(|id| id == "m4") {
                    return Err(ServiceError::transient("upstream 502"));
                }
                let results: Vec<Value> = ids.iter().map(|id| high(id)).collect();
                Ok(json!({ "results": results }))
            },
        )));
        let input = markets(9);
        let out = orchestrator(svc.clone(), 3).score_all("market", None, &input).await;

        assert_eq!(out.len(), 9);
        let ids: Vec<&str> = out.iter().map(|s| s.market.id.as_str()).collect();
        assert_eq!(ids, input.iter().map(|m| m.id.as_str()).collect::<Vec<_>>());
        // batch m3..m5 failed and was scored item by item
        assert_eq!(svc.calls(PromptId::RelevanceCheck), 3);
        assert_eq!(out[4].score, 0.5);
        assert_eq!(out[0].score, 0.85);
        assert_eq!(out[8].score, 0.85);
    }

    #[tokio::test]
    async fn test_everything_failing_still_one_result_each() {
        let svc = Arc::new(
            ScriptedService::new()
                .on(PromptId::BatchScoring, |_| Err(ServiceError::RateLimited))
                .on(PromptId::RelevanceCheck, |_| Err(ServiceError::RateLimited)),
        );
        let input = markets(5);
        let out = orchestrator(svc, 2).score_all("market", None, &input).await;

        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|s| s.degraded && s.is_rejected()));
    }

    #[tokio::test]
    async fn test_irrelevant_and_malformed_items() {
        let svc = Arc::new(individual_handlers(ScriptedService::new().on(
            PromptId::BatchScoring,
            |_| {
                Ok(json!({ "results": [
                    {"id": "m0", "is_relevant": false, "keywords_matched": []},
                    {"id": "m1", "is_relevant": true, "relevance_tier": "BOGUS", "score": 0.9},
                    {"id": "m2", "is_relevant": true, "relevance_tier": "LOW", "score": 0.9},
                    {"id": "zz", "is_relevant": true, "relevance_tier": "HIGH", "score": 0.9}
                ]}))
            },
        )));
        let out = orchestrator(svc.clone(), 10)
            .score_all("market", None, &markets(3))
            .await;

        assert!(out[0].is_rejected());
        // unusable tier goes through the per-item path
        assert_eq!(out[1].score, 0.5);
        // out-of-band LOW score moved to the band midpoint
        assert_eq!(out[2].score, 0.2);
        assert_eq!(svc.calls(PromptId::RelevanceCheck), 1);
    }

    #[tokio::test]
    async fn test_fallback_items_keep_query_context() {
        let svc = Arc::new(
            ScriptedService::new()
                .on(PromptId::BatchScoring, |_| Err(ServiceError::transient("502")))
                .on(PromptId::RelevanceCheck, |inputs| {
                    let relevant = inputs["query_context"]["main_topic"] == "bitcoin price";
                    Ok(json!({ "is_relevant": relevant }))
                })
                .on(PromptId::TieredScoring, |inputs| {
                    assert_eq!(inputs["query_context"]["temporal_qualifier"], "this year");
                    Ok(json!({"relevance_tier": "HIGH", "score": 0.9}))
                }),
        );
        let ctx = QueryContext {
            main_topic: "bitcoin price".into(),
            temporal_qualifier: Some("this year".into()),
            ..QueryContext::default()
        };
        let out = orchestrator(svc.clone(), 5)
            .score_all("market", Some(&ctx), &markets(3))
            .await;

        assert!(out.iter().all(|s| s.score == 0.9 && !s.degraded));
        assert_eq!(svc.calls(PromptId::TieredScoring), 3);
    }

    #[tokio::test]
    async fn test_numeric_ids_accepted() {
        let svc = Arc::new(ScriptedService::new().on(PromptId::BatchScoring, |_| {
            Ok(json!({ "results": [
                {"id": 17, "is_relevant": true, "relevance_tier": "MEDIUM", "score": 0.6}
            ]}))
        }));
        let input = vec![MarketRecord::new("17", "Numeric id market")];
        let out = orchestrator(svc.clone(), 5).score_all("market", None, &input).await;
        assert_eq!(out[0].score, 0.6);
        assert_eq!(svc.calls(PromptId::RelevanceCheck), 0);
    }
}
