//! Market data provider abstraction.
//!
//! [`MarketDataProvider`] is the seam between the collection cycle and the
//! external price API. [`CoinGeckoClient`] is the HTTP implementation; tests
//! substitute scripted providers.

pub mod coingecko;
pub mod errors;
pub mod models;

use async_trait::async_trait;

pub use coingecko::CoinGeckoClient;
pub use errors::ProviderError;
pub use models::{DetailMarketData, RawAsset, RawAssetDetail};

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// One page of the ranked listing. `page` starts at 1.
    async fn fetch_page(&self, page: u32) -> Result<Vec<RawAsset>, ProviderError>;

    /// Per-asset detail lookup by provider identifier.
    async fn fetch_detail(&self, asset_id: &str) -> Result<RawAssetDetail, ProviderError>;

    /// The authoritative listing used to reconcile identifiers with symbols.
    async fn fetch_markets_listing(&self) -> Result<Vec<RawAsset>, ProviderError>;
}
