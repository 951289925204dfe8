use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use stratum_core::config::DatabaseConfig;
use stratum_core::error::{Result, StratumError};

/// Database connection wrapper for relational namespaces.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new connection pool from configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(StratumError::Config(
                "database.url is not set".to_string(),
            ));
        }

        let pool = Self::pool_options(config)
            .connect(&config.url)
            .await
            .map_err(|e| StratumError::Database(format!("Failed to connect: {}", e)))?;

        debug!(pool_size = config.pool_size, "Database pool created");
        Ok(Self { pool })
    }

    fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
        // The advisory lock holds one connection for the whole run.
        PgPoolOptions::new()
            .max_connections(config.pool_size.max(2))
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StratumError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Close all connections gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
