use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ----------- Catalog records -----------------

/// One prediction-market question as supplied by the catalog. Read-only for the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, rename = "endDate")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub slug: Option<String>,
}

impl MarketRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category: None,
            end_date: None,
            active: true,
            slug: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

// ----------- Query context -----------------

/// Numeric target mentioned in a query, e.g. "$200k" -> value 200, suffix "k".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NumericTarget {
    pub raw: String,
    pub value: f64,
    pub suffix: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub main_topic: String,
    pub entities: Vec<String>,
    pub temporal_qualifier: Option<String>,
    pub numeric_targets: Vec<NumericTarget>,
    pub intent: String,
}

impl QueryContext {
    pub fn is_empty(&self) -> bool {
        self.main_topic.is_empty()
            && self.entities.is_empty()
            && self.temporal_qualifier.is_none()
            && self.numeric_targets.is_empty()
            && self.intent.is_empty()
    }
}

// ----------- Scoring output -----------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    /// Inclusive score band the tier is allowed to claim.
    pub fn band(&self) -> (f64, f64) {
        match self {
            Tier::High => (0.8, 1.0),
            Tier::Medium => (0.4, 0.7),
            Tier::Low => (0.0, 0.3),
        }
    }

    pub fn midpoint(&self) -> f64 {
        match self {
            Tier::High => 0.9,
            Tier::Medium => 0.55,
            Tier::Low => 0.2,
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        let (lo, hi) = self.band();
        score >= lo && score <= hi
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Tier::High),
            "MEDIUM" => Some(Tier::Medium),
            "LOW" => Some(Tier::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::High => write!(f, "HIGH"),
            Tier::Medium => write!(f, "MEDIUM"),
            Tier::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub market: MarketRecord,
    pub score: f64,
    pub tier: Option<Tier>,
    pub reasoning: String,
    pub matched_terms: Vec<String>,
    /// Score came from a fallback path rather than a successful evaluation.
    pub degraded: bool,
}

impl ScoredCandidate {
    /// Excluded by the relevance gate.
    pub fn is_rejected(&self) -> bool {
        self.tier.is_none() && self.score == 0.0
    }

    pub fn is_tier(&self, tier: Tier) -> bool {
        self.tier == Some(tier)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Heuristic,
    Semantic,
    Mixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MatchOutcome {
    Matched,
    NoConfidentMatch,
    NoCandidates,
}

#[derive(Clone, Debug, Serialize)]
pub struct MatchResult {
    pub query: String,
    /// Descending by score.
    pub candidates: Vec<ScoredCandidate>,
    pub strategy_used: Strategy,
    pub outcome: MatchOutcome,
    pub best_score: Option<f64>,
    pub category_reasoning: Option<String>,
}

impl MatchResult {
    /// Top candidate of a confident match; `None` for every other outcome.
    pub fn best(&self) -> Option<&ScoredCandidate> {
        match self.outcome {
            MatchOutcome::Matched => self.candidates.first(),
            _ => None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.outcome == MatchOutcome::Matched
    }
}

/// Per-call options for `MatchEngine::match_query`.
#[derive(Clone, Debug)]
pub struct MatchOptions {
    pub top_k: usize,
    pub min_confidence: f64,
    pub strategy: Strategy,
    /// Reference date for temporal scoring; `None` means now.
    pub reference_time: Option<DateTime<Utc>>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_confidence: 0.3,
            strategy: Strategy::Heuristic,
            reference_time: None,
        }
    }
}
