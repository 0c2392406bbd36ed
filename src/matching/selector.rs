//! Final ranking and threshold.

use crate::core::types::{MatchOutcome, MatchResult, ScoredCandidate, Strategy};
use std::cmp::Ordering;
use tracing::debug;

pub struct MatchSelector;

impl MatchSelector {
    /// Rank descending by score (stable, so ties keep input order), drop zero scores and
    /// keep at most `top_k`. The outcome is decided on the best score alone; a rejected
    /// result carries only `best_score`, never a low-quality shortlist.
    pub fn select(
        query: &str,
        scored: Vec<ScoredCandidate>,
        top_k: usize,
        min_confidence: f64,
        strategy_used: Strategy,
    ) -> MatchResult {
        let total = scored.len();
        let mut ranked: Vec<ScoredCandidate> =
            scored.into_iter().filter(|c| c.score > 0.0).collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked.truncate(top_k);

        let best_score = ranked.first().map(|c| c.score);
        let outcome = match best_score {
            _ if total == 0 => MatchOutcome::NoCandidates,
            Some(best) if best >= min_confidence => MatchOutcome::Matched,
            _ => MatchOutcome::NoConfidentMatch,
        };
        if outcome != MatchOutcome::Matched {
            ranked.clear();
        }
        debug!(
            total,
            kept = ranked.len(),
            ?best_score,
            ?outcome,
            "candidates ranked"
        );

        MatchResult {
            query: query.to_string(),
            candidates: ranked,
            strategy_used,
            outcome,
            best_score,
            category_reasoning: None,
        }
    }
}
