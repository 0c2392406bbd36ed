use crate::config::config::LlmCfg;
use crate::core::errors::ServiceError;
use crate::llm::{PromptId, ReasoningService};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

/// Reasoning service backed by any OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct OpenAiReasoningService {
    client: Client<OpenAIConfig>,
    cfg: LlmCfg,
    // shared across clones so all workers draw from one quota
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl OpenAiReasoningService {
    pub fn new(cfg: LlmCfg) -> Self {
        let rpm = NonZeroU32::new(cfg.rate_limit_rpm).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        let openai_config = OpenAIConfig::new()
            .with_api_key(&cfg.api_key)
            .with_api_base(&cfg.base_url);
        let client = Client::with_config(openai_config);

        Self {
            client,
            cfg,
            limiter,
        }
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }
}

/// Render the user message for one call: instructions, inputs and the expected JSON shape.
fn render_prompt(prompt: PromptId, inputs: &Value) -> String {
    let fields = prompt
        .output_fields()
        .iter()
        .map(|(name, desc)| format!("- '{}': {}", name, desc))
        .collect::<Vec<_>>()
        .join("\n");
    let inputs = serde_json::to_string_pretty(inputs).unwrap_or_else(|_| inputs.to_string());

    format!(
        "{}\n\nInputs:\n{}\n\nOutput strictly valid JSON (a single object) with fields:\n{}",
        prompt.instructions(),
        inputs,
        fields
    )
}

/// Parse the model's reply, tolerating markdown code fences around the JSON.
fn parse_reply(content: &str) -> Result<Value, ServiceError> {
    let clean = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: Value = serde_json::from_str(clean)
        .map_err(|e| ServiceError::malformed(format!("invalid JSON ({}): {}", e, clean)))?;
    if !value.is_object() {
        return Err(ServiceError::malformed("reply is not a JSON object"));
    }
    Ok(value)
}

#[async_trait]
impl ReasoningService for OpenAiReasoningService {
    async fn infer(&self, prompt: PromptId, inputs: Value) -> Result<Value, ServiceError> {
        self.limiter.until_ready().await;

        let user = render_prompt(prompt, &inputs);
        let build_err = |e: async_openai::error::OpenAIError| {
            ServiceError::malformed(format!("building request: {}", e))
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.cfg.model)
            .temperature(self.cfg.temperature)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content("You are a precise assistant that only outputs JSON.")
                    .build()
                    .map_err(build_err)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()
                    .map_err(build_err)?
                    .into(),
            ])
            .build()
            .map_err(build_err)?;

        debug!(prompt = %prompt, model = %self.cfg.model, "calling reasoning service");

        let response = self.client.chat().create(request).await.map_err(|e| {
            let msg = e.to_string();
            if msg.contains("429") || msg.to_lowercase().contains("rate limit") {
                ServiceError::RateLimited
            } else {
                ServiceError::transient(msg)
            }
        })?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| ServiceError::malformed("no content in reply"))?;

        parse_reply(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reply_strips_fences() {
        let v = parse_reply("```json\n{\"is_relevant\": true}\n```").unwrap();
        assert_eq!(v["is_relevant"], json!(true));
    }

    #[test]
    fn test_parse_reply_rejects_non_objects() {
        assert!(matches!(
            parse_reply("[1, 2]"),
            Err(ServiceError::Malformed { .. })
        ));
        assert!(matches!(
            parse_reply("sure! here you go"),
            Err(ServiceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_render_prompt_lists_fields() {
        let p = render_prompt(
            PromptId::TieredScoring,
            &json!({"query": "q", "market_title": "t"}),
        );
        assert!(p.contains("'relevance_tier'"));
        assert!(p.contains("\"market_title\": \"t\""));
    }

    #[tokio::test]
    #[ignore] // needs a live endpoint: LLM__API_KEY=... cargo test -- --ignored
    async fn test_real_relevance_call() {
        let mut cfg = LlmCfg::default();
        cfg.api_key = std::env::var("LLM__API_KEY").unwrap_or_default();
        let svc = OpenAiReasoningService::new(cfg);
        println!("Testing with model: {}", svc.model());

        let out = svc
            .infer(
                PromptId::RelevanceCheck,
                json!({
                    "query": "Bitcoin reaching $200k this year",
                    "market_title": "Will Bitcoin reach $200,000 by end of 2025?"
                }),
            )
            .await
            .unwrap();
        assert_eq!(out["is_relevant"], json!(true));
    }
}
