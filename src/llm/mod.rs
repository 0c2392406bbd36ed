//! Seam to the external reasoning service.
//!
//! The engine only knows `infer(prompt, inputs) -> outputs`; each prompt carries its own
//! instructions and output schema, so providers stay interchangeable and tests can
//! script responses per prompt.

pub mod client;
#[cfg(test)]
pub mod mock;

use crate::core::errors::ServiceError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    QueryContext,
    CategorySelection,
    RelevanceCheck,
    TieredScoring,
    BatchScoring,
}

impl PromptId {
    pub fn name(&self) -> &'static str {
        match self {
            PromptId::QueryContext => "query_context",
            PromptId::CategorySelection => "category_selection",
            PromptId::RelevanceCheck => "relevance_check",
            PromptId::TieredScoring => "tiered_scoring",
            PromptId::BatchScoring => "batch_scoring",
        }
    }

    pub fn instructions(&self) -> &'static str {
        match self {
            PromptId::QueryContext => {
                "Extract the structured context of a user's question about prediction markets: \
                 the main topic, named entities, any time qualifier (e.g. 'this year', 'by June'), \
                 numeric targets (e.g. '$200k', '3%') and the user's intent."
            }
            PromptId::CategorySelection => {
                "Select the prediction-market categories that might contain markets relevant to \
                 the query. Several categories may be selected. Only use names from \
                 available_categories."
            }
            PromptId::RelevanceCheck => {
                "Decide whether the market directly addresses the query topic. Markets that are \
                 only tangentially related or merely share a category are NOT relevant."
            }
            PromptId::TieredScoring => {
                "Score how well the market matches the query using explicit tiers: \
                 HIGH (0.8-1.0) direct match, MEDIUM (0.4-0.7) related, LOW (0.0-0.3) weak. \
                 The score must lie within the chosen tier's range."
            }
            PromptId::BatchScoring => {
                "For every market in the list, decide whether it directly addresses the query \
                 (tangential or same-category-only markets are not relevant) and, if relevant, \
                 score it with tiers: HIGH (0.8-1.0) direct match, MEDIUM (0.4-0.7) related, \
                 LOW (0.0-0.3) weak. Return exactly one result per market id."
            }
        }
    }

    /// Output fields the response object must carry, with a short description each.
    pub fn output_fields(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            PromptId::QueryContext => &[
                ("main_topic", "string"),
                ("entities", "list of strings"),
                ("temporal_qualifier", "short string or null"),
                ("numeric_targets", "list of strings such as \"$200k\" or \"3%\""),
                ("intent", "string"),
            ],
            PromptId::CategorySelection => &[
                ("selected_categories", "list of category names"),
                ("reasoning", "brief explanation"),
            ],
            PromptId::RelevanceCheck => &[
                ("is_relevant", "boolean, true only for a direct match"),
                ("keywords_matched", "list of words connecting query and market"),
            ],
            PromptId::TieredScoring => &[
                ("relevance_tier", "HIGH | MEDIUM | LOW"),
                ("score", "number within the tier range"),
                ("reasoning", "why this score was assigned"),
            ],
            PromptId::BatchScoring => &[(
                "results",
                "list of {id, is_relevant, keywords_matched, relevance_tier, score, reasoning}",
            )],
        }
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync + 'static {
    async fn infer(&self, prompt: PromptId, inputs: Value) -> Result<Value, ServiceError>;
}

/// Injected handle used by every semantic component: a service plus the per-call timeout.
#[derive(Clone)]
pub struct Reasoner {
    service: Arc<dyn ReasoningService>,
    call_timeout: Duration,
}

impl Reasoner {
    pub fn new(service: Arc<dyn ReasoningService>, call_timeout: Duration) -> Self {
        Self {
            service,
            call_timeout,
        }
    }

    /// One bounded call, decoded into the caller's output type. A timeout or a
    /// schema mismatch comes back as a `ServiceError` like any transport failure.
    pub async fn call<T: DeserializeOwned>(
        &self,
        prompt: PromptId,
        inputs: Value,
    ) -> Result<T, ServiceError> {
        let value = match tokio::time::timeout(self.call_timeout, self.service.infer(prompt, inputs))
            .await
        {
            Ok(res) => res?,
            Err(_) => {
                return Err(ServiceError::Timeout {
                    after: self.call_timeout,
                });
            }
        };

        serde_json::from_value(value)
            .map_err(|e| ServiceError::malformed(format!("{} output: {}", prompt, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedService;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Out {
        is_relevant: bool,
    }

    #[tokio::test]
    async fn test_call_decodes_output() {
        let svc = ScriptedService::new()
            .on(PromptId::RelevanceCheck, |_| Ok(json!({"is_relevant": true})));
        let r = Reasoner::new(Arc::new(svc), Duration::from_secs(1));
        let out: Out = r.call(PromptId::RelevanceCheck, json!({})).await.unwrap();
        assert!(out.is_relevant);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_malformed() {
        let svc = ScriptedService::new()
            .on(PromptId::RelevanceCheck, |_| Ok(json!({"is_relevant": "maybe"})));
        let r = Reasoner::new(Arc::new(svc), Duration::from_secs(1));
        let err = r
            .call::<Out>(PromptId::RelevanceCheck, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let svc = ScriptedService::new()
            .with_delay(PromptId::RelevanceCheck, Duration::from_millis(200))
            .on(PromptId::RelevanceCheck, |_| Ok(json!({"is_relevant": true})));
        let r = Reasoner::new(Arc::new(svc), Duration::from_millis(20));
        let err = r
            .call::<Out>(PromptId::RelevanceCheck, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { .. }));
    }

    #[test]
    fn test_every_prompt_has_schema() {
        for p in [
            PromptId::QueryContext,
            PromptId::CategorySelection,
            PromptId::RelevanceCheck,
            PromptId::TieredScoring,
            PromptId::BatchScoring,
        ] {
            assert!(!p.instructions().is_empty());
            assert!(!p.output_fields().is_empty());
        }
    }
}
