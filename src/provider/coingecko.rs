use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info, warn};
use moka::future::Cache;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, StatusCode,
};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::{IngestionPolicy, ProviderSettings, RetryPolicy};
use crate::provider::{MarketDataProvider, ProviderError, RawAsset, RawAssetDetail};

/// CoinGecko-compatible REST client.
///
/// Every request has a bounded timeout and goes through a bounded retry
/// loop: 429 waits for `Retry-After` (or the configured default), other
/// transient failures wait a fixed backoff. 4xx responses are not retried.
#[derive(Clone)]
pub struct CoinGeckoClient {
    client: Client,
    base_url: Url,
    vs_currency: String,
    per_page: u32,
    listing_size: u32,
    retry: RetryPolicy,
    /// Markets listing keyed by listing size
    listing_cache: Cache<u32, Arc<Vec<RawAsset>>>,
}

impl CoinGeckoClient {
    pub fn new(settings: &ProviderSettings, policy: &IngestionPolicy) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &settings.api_key {
            let name = if settings.pro {
                "x-cg-pro-api-key"
            } else {
                "x-cg-demo-api-key"
            };
            headers.insert(
                name,
                HeaderValue::from_str(key).context("API key is not a valid header value")?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        // A trailing slash keeps the last path segment when joining endpoints
        let mut base = settings.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid provider base URL: {}", settings.base_url))?;

        let listing_cache = Cache::builder()
            .max_capacity(4)
            .time_to_live(settings.listing_cache_ttl())
            .build();

        Ok(Self {
            client,
            base_url,
            vs_currency: settings.vs_currency.clone(),
            per_page: policy.per_page,
            listing_size: settings.listing_size,
            retry: policy.retry.clone(),
            listing_cache,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::Validation(format!("invalid endpoint {}: {}", path, e)))
    }

    fn markets_query(&self, per_page: u32, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("vs_currency", self.vs_currency.clone()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
            ("sparkline", "false".to_string()),
        ]
    }

    /// Runs the request up to `max_attempts` times. No wait after the last attempt.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&'static str, String)],
        what: &str,
    ) -> Result<T, ProviderError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Fetching {} (attempt {}/{})", what, attempt, max_attempts);

            let err = match self.get_once(url.clone(), query).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!("Fetching {} failed after {} attempts: {}", what, attempt, err);
                return Err(ProviderError::Exhausted {
                    attempts: attempt,
                    cause: Box::new(err),
                });
            }

            let wait = match &err {
                ProviderError::RateLimited { retry_after_secs } => {
                    Duration::from_secs(*retry_after_secs)
                },
                _ => self.retry.transient_backoff(),
            };
            warn!(
                "Fetching {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                what, attempt, max_attempts, err, wait
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&'static str, String)],
    ) -> Result<T, ProviderError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let header = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            return Err(ProviderError::RateLimited {
                retry_after_secs: parse_retry_after(header, self.retry.rate_limit_backoff_secs),
            });
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            if status.is_server_error() {
                return Err(ProviderError::Transient(format!("HTTP {}: {}", status, body)));
            }
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

/// Seconds to wait from a `Retry-After` header. HTTP-date values and
/// missing headers fall back to `default_secs`.
pub fn parse_retry_after(header: Option<&str>, default_secs: u64) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_secs)
}

#[async_trait]
impl MarketDataProvider for CoinGeckoClient {
    async fn fetch_page(&self, page: u32) -> Result<Vec<RawAsset>, ProviderError> {
        if page == 0 {
            return Err(ProviderError::Validation("page numbers start at 1".to_string()));
        }

        let url = self.endpoint("coins/markets")?;
        let query = self.markets_query(self.per_page, page);
        let assets: Vec<RawAsset> = self
            .get_with_retry(url, &query, &format!("markets page {}", page))
            .await?;

        info!("Page {} fetched successfully. Found {} assets.", page, assets.len());
        Ok(assets)
    }

    async fn fetch_detail(&self, asset_id: &str) -> Result<RawAssetDetail, ProviderError> {
        let id = asset_id.trim();
        if id.is_empty() || id.contains('/') {
            return Err(ProviderError::Validation(format!("invalid asset id '{}'", asset_id)));
        }

        let url = self.endpoint(&format!("coins/{}", id))?;
        let query = vec![
            ("localization", "false".to_string()),
            ("tickers", "false".to_string()),
            ("market_data", "true".to_string()),
            ("community_data", "false".to_string()),
            ("developer_data", "false".to_string()),
        ];

        self.get_with_retry(url, &query, &format!("detail for {}", id))
            .await
    }

    async fn fetch_markets_listing(&self) -> Result<Vec<RawAsset>, ProviderError> {
        if let Some(cached) = self.listing_cache.get(&self.listing_size).await {
            debug!("Markets listing served from cache ({} entries)", cached.len());
            return Ok(cached.as_ref().clone());
        }

        let url = self.endpoint("coins/markets")?;
        let query = self.markets_query(self.listing_size, 1);
        let listing: Vec<RawAsset> = self
            .get_with_retry(url, &query, "markets listing")
            .await?;

        self.listing_cache
            .insert(self.listing_size, Arc::new(listing.clone()))
            .await;
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("30"), 15), 30);
        assert_eq!(parse_retry_after(Some(" 2 "), 15), 2);
        assert_eq!(parse_retry_after(None, 15), 15);
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT"), 15),
            15
        );
    }

    #[test]
    fn test_base_url_keeps_api_version_segment() {
        let settings = ProviderSettings::default();
        let client = CoinGeckoClient::new(&settings, &IngestionPolicy::default()).unwrap();
        let url = client.endpoint("coins/markets").unwrap();
        assert_eq!(url.as_str(), "https://api.coingecko.com/api/v3/coins/markets");
    }

    #[tokio::test]
    async fn test_page_zero_is_rejected_without_request() {
        let settings = ProviderSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let client = CoinGeckoClient::new(&settings, &IngestionPolicy::default()).unwrap();
        let err = client.fetch_page(0).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
