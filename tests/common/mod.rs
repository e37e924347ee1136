#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use supply_tracker::config::IngestionPolicy;
use supply_tracker::db::MemoryStore;
use supply_tracker::provider::{
    DetailMarketData, MarketDataProvider, ProviderError, RawAsset, RawAssetDetail,
};
use supply_tracker::IngestionOrchestrator;

/// In-memory provider with canned pages and details.
#[derive(Default)]
pub struct ScriptedProvider {
    pages: FxHashMap<u32, Vec<RawAsset>>,
    failing_pages: Vec<u32>,
    details: FxHashMap<String, f64>,
    listing: Vec<RawAsset>,
    /// Cancelled once this many pages have been served
    cancel_after: Option<(usize, CancellationToken)>,
    page_calls: AtomicUsize,
    detail_calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: u32, assets: Vec<RawAsset>) -> Self {
        self.pages.insert(page, assets);
        self
    }

    pub fn with_failing_page(mut self, page: u32) -> Self {
        self.failing_pages.push(page);
        self
    }

    pub fn with_detail(mut self, id: &str, supply: f64) -> Self {
        self.details.insert(id.to_string(), supply);
        self
    }

    pub fn with_listing(mut self, listing: Vec<RawAsset>) -> Self {
        self.listing = listing;
        self
    }

    pub fn cancel_after_pages(mut self, pages: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((pages, token));
        self
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn fetch_page(&self, page: u32) -> Result<Vec<RawAsset>, ProviderError> {
        let served = self.page_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &self.cancel_after {
            if served >= *limit {
                token.cancel();
            }
        }

        if self.failing_pages.contains(&page) {
            return Err(ProviderError::Exhausted {
                attempts: 3,
                cause: Box::new(ProviderError::RateLimited { retry_after_secs: 15 }),
            });
        }
        Ok(self.pages.get(&page).cloned().unwrap_or_default())
    }

    async fn fetch_detail(&self, asset_id: &str) -> Result<RawAssetDetail, ProviderError> {
        self.detail_calls.lock().unwrap().push(asset_id.to_string());
        match self.details.get(asset_id) {
            Some(supply) => Ok(RawAssetDetail {
                id: asset_id.to_string(),
                symbol: asset_id.to_string(),
                name: asset_id.to_string(),
                market_data: Some(DetailMarketData {
                    circulating_supply: Some(*supply),
                    ..Default::default()
                }),
            }),
            None => Err(ProviderError::Api {
                status: 404,
                body: "coin not found".to_string(),
            }),
        }
    }

    async fn fetch_markets_listing(&self) -> Result<Vec<RawAsset>, ProviderError> {
        Ok(self.listing.clone())
    }
}

pub fn asset(id: &str, symbol: &str, supply: Option<f64>) -> RawAsset {
    RawAsset {
        id: id.to_string(),
        symbol: symbol.to_string(),
        name: id.to_string(),
        current_price: Some(1.0),
        circulating_supply: supply,
        ..Default::default()
    }
}

/// `count` assets with a valid supply: ids `coin-{offset..}`, symbols `c{n}`.
pub fn valid_assets(offset: usize, count: usize) -> Vec<RawAsset> {
    (offset..offset + count)
        .map(|n| asset(&format!("coin-{}", n), &format!("c{}", n), Some(1_000.0 + n as f64)))
        .collect()
}

/// `count` assets without supply: ids `missing-{offset..}`, symbols `m{n}`.
pub fn missing_assets(offset: usize, count: usize) -> Vec<RawAsset> {
    (offset..offset + count)
        .map(|n| asset(&format!("missing-{}", n), &format!("m{}", n), None))
        .collect()
}

/// Zero delays, two pages, no important symbols.
pub fn test_policy() -> IngestionPolicy {
    IngestionPolicy {
        page_count: 2,
        page_delay_secs: 0,
        page_failure_delay_secs: 0,
        detail_delay_secs: 0,
        detail_failure_delay_secs: 0,
        important_symbols: vec![],
        ..Default::default()
    }
}

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 15, 12, 0, 0).unwrap()
}

pub fn orchestrator(
    provider: Arc<ScriptedProvider>,
    store: Arc<MemoryStore>,
    policy: IngestionPolicy,
) -> IngestionOrchestrator {
    IngestionOrchestrator::new(provider, store.clone(), store, policy)
}
