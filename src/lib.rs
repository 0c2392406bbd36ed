//! Matches free-form questions against a prediction-market catalog.
//!
//! `MatchEngine::match_query` is the entry point: a deterministic heuristic scorer,
//! a reasoning-service pipeline (category pre-filter, relevance gate, tiered scoring in
//! parallel batches) or a blend of both, followed by ranking and a confidence threshold.

pub mod catalog;
pub mod config;
pub mod core;
pub mod llm;
pub mod matching;

pub use crate::catalog::{CatalogSource, StaticCatalog};
pub use crate::config::config::{AppCfg, MatchingCfg};
pub use crate::config::lexicon::{Lexicon, LexiconHandle};
pub use crate::core::errors::{MatchError, ServiceError};
pub use crate::core::types::{
    MarketRecord, MatchOptions, MatchOutcome, MatchResult, QueryContext, ScoredCandidate, Strategy,
    Tier,
};
pub use crate::llm::{PromptId, Reasoner, ReasoningService};
pub use crate::matching::engine::MatchEngine;
