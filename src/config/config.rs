use crate::core::types::Strategy;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub llm: LlmCfg,
    #[serde(default)]
    pub matching: MatchingCfg,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmCfg {
    #[serde(rename = "baseUrl", default = "default_base_url")]
    pub base_url: String,
    #[serde(rename = "apiKey", alias = "api_key", default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(rename = "rateLimitRpm", default = "default_rpm")]
    pub rate_limit_rpm: u32,
}

impl Default for LlmCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: "".to_string(),
            model: default_model(),
            temperature: default_temperature(),
            rate_limit_rpm: default_rpm(),
        }
    }
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_rpm() -> u32 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingCfg {
    #[serde(rename = "topK", default = "default_top_k")]
    pub top_k: usize,
    #[serde(rename = "minConfidence", default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(rename = "batchSize", default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(rename = "itemConcurrency", default = "default_item_concurrency")]
    pub item_concurrency: usize,
    #[serde(rename = "callTimeout", with = "humantime_serde", default = "default_call_timeout")]
    pub call_timeout: Duration,
    #[serde(
        rename = "semanticDeadline",
        with = "humantime_serde",
        default = "default_semantic_deadline"
    )]
    pub semantic_deadline: Duration,
    #[serde(rename = "mixedSemanticWeight", default = "default_mixed_weight")]
    pub mixed_semantic_weight: f64,
    #[serde(rename = "extractContext", default = "default_true")]
    pub extract_context: bool,
    #[serde(rename = "lexiconPath", default)]
    pub lexicon_path: Option<PathBuf>,
    #[serde(default)]
    pub weights: HeuristicWeights,
}

impl Default for MatchingCfg {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_confidence: default_min_confidence(),
            strategy: Strategy::default(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            item_concurrency: default_item_concurrency(),
            call_timeout: default_call_timeout(),
            semantic_deadline: default_semantic_deadline(),
            mixed_semantic_weight: default_mixed_weight(),
            extract_context: true,
            lexicon_path: None,
            weights: HeuristicWeights::default(),
        }
    }
}
fn default_top_k() -> usize {
    10
}
fn default_min_confidence() -> f64 {
    0.3
}
fn default_batch_size() -> usize {
    20
}
fn default_workers() -> usize {
    3
}
fn default_item_concurrency() -> usize {
    4
}
fn default_call_timeout() -> Duration {
    Duration::from_secs(20)
}
fn default_semantic_deadline() -> Duration {
    Duration::from_secs(90)
}
fn default_mixed_weight() -> f64 {
    0.7
}
fn default_true() -> bool {
    true
}

/// Point values of the heuristic scorer. None of these are calibrated; the ordering
/// properties of the scorer hold for the defaults.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct HeuristicWeights {
    pub exact_substring: f64,
    pub phrase: f64,
    pub overlap_low: f64,
    pub overlap_high: f64,
    pub overlap_low_ratio: f64,
    pub multi_match_bonus: f64,
    pub multi_match_min: usize,
    pub year_end_nov_dec: f64,
    pub year_end_sep_oct: f64,
    pub year_end_jul_aug: f64,
    pub year_end_early: f64,
    pub near_term_early: f64,
    pub near_term_aug_sep: f64,
    pub near_term_late: f64,
    pub synonym_hit: f64,
    pub synonym_cap: f64,
    pub category_hit: f64,
    pub category_cap: f64,
    pub similarity_threshold: f64,
    pub similarity_factor: f64,
    pub short_query_tokens: usize,
    pub short_query_factor: f64,
    pub short_title_tokens: usize,
    pub short_title_bonus: f64,
    pub active_bonus: f64,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        Self {
            exact_substring: 0.8,
            phrase: 0.5,
            overlap_low: 0.4,
            overlap_high: 0.6,
            overlap_low_ratio: 0.5,
            multi_match_bonus: 0.2,
            multi_match_min: 3,
            year_end_nov_dec: 0.4,
            year_end_sep_oct: 0.2,
            year_end_jul_aug: 0.1,
            year_end_early: -0.2,
            near_term_early: 0.3,
            near_term_aug_sep: 0.1,
            near_term_late: -0.1,
            synonym_hit: 0.1,
            synonym_cap: 0.2,
            category_hit: 0.15,
            category_cap: 0.2,
            similarity_threshold: 0.3,
            similarity_factor: 0.3,
            short_query_tokens: 2,
            short_query_factor: 0.7,
            short_title_tokens: 10,
            short_title_bonus: 0.1,
            active_bonus: 0.05,
        }
    }
}

impl AppCfg {
    pub fn load(path: &str) -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = Config::builder()
            .add_source(File::with_name(path))
            .add_source(config::Environment::default().separator("__"))
            .build()
            .context("building config")?;

        let app: AppCfg = cfg.try_deserialize().context("deserializing config")?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        anyhow::ensure!(m.top_k > 0, "matching.topK must be > 0");
        anyhow::ensure!(
            (0.0..=1.0).contains(&m.min_confidence),
            "matching.minConfidence must be within [0, 1]"
        );
        anyhow::ensure!(m.batch_size > 0, "matching.batchSize must be > 0");
        anyhow::ensure!(m.workers > 0, "matching.workers must be > 0");
        anyhow::ensure!(
            m.item_concurrency > 0,
            "matching.itemConcurrency must be > 0"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&m.mixed_semantic_weight),
            "matching.mixedSemanticWeight must be within [0, 1]"
        );
        anyhow::ensure!(
            !m.call_timeout.is_zero(),
            "matching.callTimeout must be non-zero"
        );
        if matches!(m.strategy, Strategy::Semantic | Strategy::Mixed) {
            anyhow::ensure!(!self.llm.model.is_empty(), "llm.model missing");
            anyhow::ensure!(!self.llm.base_url.is_empty(), "llm.baseUrl missing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults_validate() {
        let cfg = AppCfg::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.matching.batch_size, 20);
        assert_eq!(cfg.matching.workers, 3);
        assert!((cfg.matching.weights.exact_substring - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_yaml_overrides_and_humantime() {
        let yaml = r#"
matching:
  topK: 5
  strategy: mixed
  callTimeout: 3s
  weights:
    activeBonus: 0.0
"#;
        let cfg: AppCfg = Config::builder()
            .add_source(File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.matching.top_k, 5);
        assert_eq!(cfg.matching.strategy, Strategy::Mixed);
        assert_eq!(cfg.matching.call_timeout, Duration::from_secs(3));
        assert_eq!(cfg.matching.weights.active_bonus, 0.0);
        // untouched weights keep their defaults
        assert!((cfg.matching.weights.phrase - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut cfg = AppCfg::default();
        cfg.matching.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_env_var_override() {
        unsafe {
            env::set_var("LLM__API_KEY", "env-key-123");
        }

        let cfg = Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()
            .unwrap();

        let val = cfg.get_string("llm.api_key").unwrap();
        assert_eq!(val, "env-key-123");

        unsafe {
            env::remove_var("LLM__API_KEY");
        }
    }
}
