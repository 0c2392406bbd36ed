use crate::core::errors::MatchError;
use crate::core::types::MarketRecord;
use async_trait::async_trait;

/// Supplies candidate markets. The engine never touches market storage itself.
#[async_trait]
pub trait CatalogSource: Send + Sync + 'static {
    async fn fetch_candidates(
        &self,
        filter_hint: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MarketRecord>, MatchError>;
}
