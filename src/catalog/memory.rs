use crate::catalog::client::CatalogSource;
use crate::core::errors::MatchError;
use crate::core::types::MarketRecord;
use crate::matching::tokenization::normalize_for_matching;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// In-memory catalog over a fixed market list.
pub struct StaticCatalog {
    markets: Vec<MarketRecord>,
}

impl StaticCatalog {
    pub fn new(markets: Vec<MarketRecord>) -> Self {
        Self { markets }
    }

    /// Load a JSON array of market records (`endDate` as RFC 3339).
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let markets: Vec<MarketRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing catalog {}", path.display()))?;
        Ok(Self::new(markets))
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

/// A hint selects a category by name, or failing that, titles containing it.
fn matches_hint(market: &MarketRecord, hint: &str) -> bool {
    if let Some(cat) = &market.category {
        if cat.trim().eq_ignore_ascii_case(hint.trim()) {
            return true;
        }
    }
    let needle = normalize_for_matching(hint);
    !needle.is_empty() && normalize_for_matching(&market.title).contains(&needle)
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn fetch_candidates(
        &self,
        filter_hint: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MarketRecord>, MatchError> {
        let hint = filter_hint.map(str::trim).filter(|h| !h.is_empty());
        let out: Vec<MarketRecord> = self
            .markets
            .iter()
            .filter(|m| m.active)
            .filter(|m| hint.is_none_or(|h| matches_hint(m, h)))
            .take(limit)
            .cloned()
            .collect();
        debug!(?hint, limit, returned = out.len(), "static catalog fetch");
        Ok(out)
    }
}
