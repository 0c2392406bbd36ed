//! Scripted reasoning service for tests.

use crate::core::errors::ServiceError;
use crate::llm::{PromptId, ReasoningService};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

type Handler = Box<dyn Fn(&Value) -> Result<Value, ServiceError> + Send + Sync>;

#[derive(Default)]
pub struct ScriptedService {
    handlers: HashMap<PromptId, Handler>,
    delays: HashMap<PromptId, Duration>,
    calls: DashMap<PromptId, usize>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, prompt: PromptId, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, ServiceError> + Send + Sync + 'static,
    {
        self.handlers.insert(prompt, Box::new(handler));
        self
    }

    pub fn with_delay(mut self, prompt: PromptId, delay: Duration) -> Self {
        self.delays.insert(prompt, delay);
        self
    }

    pub fn calls(&self, prompt: PromptId) -> usize {
        self.calls.get(&prompt).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn infer(&self, prompt: PromptId, inputs: Value) -> Result<Value, ServiceError> {
        *self.calls.entry(prompt).or_insert(0) += 1;

        if let Some(delay) = self.delays.get(&prompt) {
            tokio::time::sleep(*delay).await;
        }

        match self.handlers.get(&prompt) {
            Some(handler) => handler(&inputs),
            None => Err(ServiceError::transient(format!("no handler for {}", prompt))),
        }
    }
}
