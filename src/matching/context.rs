use crate::core::types::{NumericTarget, QueryContext};
use crate::llm::{PromptId, Reasoner};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

const MAX_QUALIFIER_CHARS: usize = 48;
const MAX_QUALIFIER_WORDS: usize = 6;

#[derive(Debug, Deserialize)]
struct RawContext {
    #[serde(default)]
    main_topic: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    temporal_qualifier: Option<String>,
    #[serde(default)]
    numeric_targets: Vec<Value>,
    #[serde(default)]
    intent: String,
}

/// Structured enrichment of a query. Optional: any failure yields an empty context.
pub struct QueryContextExtractor {
    reasoner: Reasoner,
}

impl QueryContextExtractor {
    pub fn new(reasoner: Reasoner) -> Self {
        Self { reasoner }
    }

    pub async fn extract(&self, query: &str) -> QueryContext {
        let raw: RawContext = match self
            .reasoner
            .call(PromptId::QueryContext, json!({ "query": query }))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "query context extraction failed; continuing without context");
                return QueryContext::default();
            }
        };

        let ctx = validate(raw);
        debug!(?ctx, "query context extracted");
        ctx
    }
}

fn validate(raw: RawContext) -> QueryContext {
    let entities = raw
        .entities
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();

    let temporal_qualifier = raw
        .temporal_qualifier
        .map(|q| q.trim().to_string())
        .filter(|q| {
            !q.is_empty()
                && q.chars().count() <= MAX_QUALIFIER_CHARS
                && q.split_whitespace().count() <= MAX_QUALIFIER_WORDS
        });

    let numeric_targets = raw
        .numeric_targets
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => parse_numeric_target(s),
            Value::Number(n) => n.as_f64().map(|value| NumericTarget {
                raw: n.to_string(),
                value,
                suffix: None,
            }),
            _ => None,
        })
        .collect();

    QueryContext {
        main_topic: raw.main_topic.trim().to_string(),
        entities,
        temporal_qualifier,
        numeric_targets,
        intent: raw.intent.trim().to_string(),
    }
}

/// Accepts "200k", "$200,000", "3.5%", "25bps", "1.2 bn"; rejects anything else.
pub fn parse_numeric_target(raw: &str) -> Option<NumericTarget> {
    lazy_static! {
        static ref TARGET_RE: Regex = Regex::new(
            r"(?i)^\$?\s*(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)\s*(k|m|b|bn|%|bps|bp)?$"
        )
        .unwrap();
    }

    let trimmed = raw.trim();
    let caps = TARGET_RE.captures(trimmed)?;
    let value: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let suffix = caps.get(2).map(|m| m.as_str().to_lowercase());

    Some(NumericTarget {
        raw: trimmed.to_string(),
        value,
        suffix,
    })
}
