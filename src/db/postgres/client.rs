use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

const SCHEMA_PATH: &str = "schema/postgres.sql";

/// Split a schema file into statements on `;`, skipping `--` comment lines.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let without_comments: String = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(str::to_string)
        .collect()
}

/// PostgreSQL client with connection pooling.
///
/// Backs both the supply series store and the snapshot store. Uses
/// `deadpool-postgres` for connection management.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL at {}:{}", settings.host, settings.port);

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(settings.pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        let max_retries = 3;
        let mut retries = 0;

        loop {
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self { pool });
                },
                Err(e) => {
                    retries += 1;
                    if retries >= max_retries {
                        return Err(anyhow::anyhow!(
                            "Failed to connect to PostgreSQL after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }

                    let delay = std::time::Duration::from_millis(100 * 2_u64.pow(retries));
                    warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}...",
                        retries, max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// Health check - verify connection is still alive
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Applying PostgreSQL schema from {}", SCHEMA_PATH);
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string(SCHEMA_PATH)
            .await
            .with_context(|| format!("Failed to read {}", SCHEMA_PATH))?;

        for stmt in split_sql_statements(&schema) {
            client
                .execute(stmt.as_str(), &[])
                .await
                .with_context(|| format!("Failed to execute schema statement: {}", stmt))?;
        }

        info!("PostgreSQL schema applied successfully");
        Ok(())
    }
}
