use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Per-symbol circulating supply series
/// - Daily snapshot batches
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    8
}

/// Market data provider connection settings (CoinGecko-compatible API).
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Optional API key. Sent as `x-cg-pro-api-key` when `pro` is set,
    /// `x-cg-demo-api-key` otherwise.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub pro: bool,
    #[serde(default = "default_vs_currency")]
    pub vs_currency: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Size of the markets listing used for symbol reconciliation
    #[serde(default = "default_listing_size")]
    pub listing_size: u32,
    #[serde(default = "default_listing_cache_ttl_secs")]
    pub listing_cache_ttl_secs: u64,
}

fn default_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_vs_currency() -> String {
    "usd".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("supply-tracker/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_listing_size() -> u32 {
    250
}

fn default_listing_cache_ttl_secs() -> u64 {
    120
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            pro: false,
            vs_currency: default_vs_currency(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            listing_size: default_listing_size(),
            listing_cache_ttl_secs: default_listing_cache_ttl_secs(),
        }
    }
}

impl ProviderSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn listing_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_cache_ttl_secs)
    }
}

/// Retry behaviour for a single provider request.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Used when a 429 response carries no usable `Retry-After` header
    pub rate_limit_backoff_secs: u64,
    pub transient_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_backoff_secs: 15,
            transient_backoff_secs: 15,
        }
    }
}

impl RetryPolicy {
    pub fn transient_backoff(&self) -> Duration {
        Duration::from_secs(self.transient_backoff_secs)
    }
}

/// Lookback thresholds for supply change computation.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChangePolicy {
    /// Windows up to this many days reject references that are too far from the target
    pub short_window_max_days: u32,
    /// Maximum distance between a reference and the target for short windows
    pub acceptance_window_days: u32,
    /// Window for which a missing reference is extrapolated from the latest reading
    pub extrapolation_window_days: u32,
    pub day_window_days: u32,
    pub week_window_days: u32,
    pub month_window_days: u32,
}

impl Default for ChangePolicy {
    fn default() -> Self {
        Self {
            short_window_max_days: 7,
            acceptance_window_days: 7,
            extrapolation_window_days: 30,
            day_window_days: 1,
            week_window_days: 7,
            month_window_days: 30,
        }
    }
}

/// An asset that always gets a dedicated supply lookup when the bulk
/// listing did not produce a usable value for it.
#[derive(Debug, Deserialize, Clone)]
pub struct ImportantSymbol {
    pub symbol: String,
    /// Provider identifier used when the listing has no mapping for the symbol
    pub fallback_id: String,
}

impl ImportantSymbol {
    pub fn new(symbol: &str, fallback_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            fallback_id: fallback_id.to_string(),
        }
    }
}

/// Every policy constant of a collection cycle in one place.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestionPolicy {
    pub page_count: u32,
    pub per_page: u32,
    pub retry: RetryPolicy,
    pub page_delay_secs: u64,
    pub page_failure_delay_secs: u64,
    pub detail_delay_secs: u64,
    pub detail_failure_delay_secs: u64,
    /// Maximum number of per-asset detail lookups for missing supply in one cycle
    pub backfill_cap: usize,
    pub important_symbols: Vec<ImportantSymbol>,
    pub changes: ChangePolicy,
}

impl Default for IngestionPolicy {
    fn default() -> Self {
        Self {
            page_count: 5,
            per_page: 100,
            retry: RetryPolicy::default(),
            page_delay_secs: 15,
            page_failure_delay_secs: 5,
            detail_delay_secs: 10,
            detail_failure_delay_secs: 5,
            backfill_cap: 100,
            important_symbols: vec![
                ImportantSymbol::new("BNB", "binancecoin"),
                ImportantSymbol::new("BTC", "bitcoin"),
                ImportantSymbol::new("ETH", "ethereum"),
                ImportantSymbol::new("SOL", "solana"),
                ImportantSymbol::new("XRP", "ripple"),
            ],
            changes: ChangePolicy::default(),
        }
    }
}

impl IngestionPolicy {
    pub fn page_delay(&self) -> Duration {
        Duration::from_secs(self.page_delay_secs)
    }

    pub fn page_failure_delay(&self) -> Duration {
        Duration::from_secs(self.page_failure_delay_secs)
    }

    pub fn detail_delay(&self) -> Duration {
        Duration::from_secs(self.detail_delay_secs)
    }

    pub fn detail_failure_delay(&self) -> Duration {
        Duration::from_secs(self.detail_failure_delay_secs)
    }
}

/// Cron schedules for the collection cycle.
///
/// Expressions use the six-field form with seconds. The defaults mirror an
/// hourly check plus a dedicated midnight run; runs after the first one on
/// a given day are no-ops.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CronSettings {
    pub schedules: Vec<String>,
    pub run_on_startup: bool,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            schedules: vec!["0 0 * * * *".to_string(), "0 0 0 * * *".to_string()],
            run_on_startup: true,
        }
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, then overlaid with
/// `SUPPLY__SECTION__KEY` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub policy: IngestionPolicy,
    #[serde(default)]
    pub cron: CronSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("config")
    }

    pub fn from_file(name: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(name))
            .add_source(Environment::with_prefix("SUPPLY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
