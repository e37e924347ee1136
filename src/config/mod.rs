#[allow(clippy::module_inception)]
mod config;

pub use self::config::{
    ChangePolicy, CronSettings, ImportantSymbol, IngestionPolicy, PostgresSettings,
    ProviderSettings, RetryPolicy, Settings,
};
