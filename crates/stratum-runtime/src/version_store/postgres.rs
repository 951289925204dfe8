use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use stratum_core::config::MigrationsConfig;
use stratum_core::error::{Result, StratumError};
use stratum_core::version::{VersionRecord, VersionStore};

/// First key of the two-key advisory lock, "STRA" in ASCII. The second key
/// is `hashtext(namespace)`.
const LOCK_CLASS: i32 = 0x5354_5241;

const DEFAULT_TABLE: &str = "stratum_versions";

/// PostgreSQL version store: one row per namespace.
pub struct PgVersionStore {
    pool: PgPool,
    table: String,
    advisory_lock: bool,
    initialized: OnceCell<()>,
    /// Connections holding a session-level advisory lock, by namespace.
    held_locks: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PgVersionStore {
    /// Store using the default table with advisory locking enabled.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
            advisory_lock: true,
            initialized: OnceCell::new(),
            held_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(pool: PgPool, config: &MigrationsConfig) -> Result<Self> {
        Self::new(pool)
            .with_table(&config.version_table)
            .map(|store| store.with_advisory_lock(config.advisory_lock))
    }

    /// Use a different table. The name may be schema-qualified.
    pub fn with_table(mut self, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        self.table = table.to_string();
        Ok(self)
    }

    pub fn with_advisory_lock(mut self, enabled: bool) -> Self {
        self.advisory_lock = enabled;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn ensure_table(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                sqlx::query(&create_table_sql(&self.table))
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        StratumError::VersionStore(format!(
                            "Failed to create version table '{}': {}",
                            self.table, e
                        ))
                    })?;
                debug!(table = %self.table, "Version table ready");
                Ok::<(), StratumError>(())
            })
            .await?;
        Ok(())
    }
}

impl VersionStore for PgVersionStore {
    fn get_version<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<u32>> {
        Box::pin(async move {
            self.ensure_table().await?;

            let row: Option<(i32,)> = sqlx::query_as(&select_version_sql(&self.table))
                .bind(namespace)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    StratumError::VersionStore(format!(
                        "Failed to read version of '{}': {}",
                        namespace, e
                    ))
                })?;

            match row {
                Some((version,)) => to_version(namespace, version),
                None => Ok(0),
            }
        })
    }

    fn set_version<'a>(&'a self, namespace: &'a str, version: u32) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.ensure_table().await?;

            let stored = i32::try_from(version).map_err(|_| {
                StratumError::VersionStore(format!(
                    "Version {} of '{}' does not fit the version column",
                    version, namespace
                ))
            })?;

            sqlx::query(&upsert_version_sql(&self.table))
                .bind(namespace)
                .bind(stored)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    StratumError::VersionStore(format!(
                        "Failed to record version {} of '{}': {}",
                        version, namespace, e
                    ))
                })?;

            debug!(namespace, version, "Recorded version");
            Ok(())
        })
    }

    fn records(&self) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            self.ensure_table().await?;

            let rows: Vec<(String, i32, Option<DateTime<Utc>>)> =
                sqlx::query_as(&select_records_sql(&self.table))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| {
                        StratumError::VersionStore(format!("Failed to list versions: {}", e))
                    })?;

            rows.into_iter()
                .map(|(namespace, version, updated_at)| {
                    let version = to_version(&namespace, version)?;
                    Ok(VersionRecord {
                        namespace,
                        version,
                        updated_at,
                    })
                })
                .collect()
        })
    }

    fn lock<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if !self.advisory_lock {
                return Ok(());
            }

            if self.held_locks.lock().await.contains_key(namespace) {
                return Err(StratumError::VersionStore(format!(
                    "Namespace '{}' is already locked by this process",
                    namespace
                )));
            }

            let mut conn = self.pool.acquire().await.map_err(|e| {
                StratumError::VersionStore(format!("Failed to acquire lock connection: {}", e))
            })?;

            debug!(namespace, "Acquiring migration lock...");
            sqlx::query("SELECT pg_advisory_lock($1, hashtext($2))")
                .bind(LOCK_CLASS)
                .bind(namespace)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    StratumError::VersionStore(format!(
                        "Failed to acquire migration lock for '{}': {}",
                        namespace, e
                    ))
                })?;
            debug!(namespace, "Migration lock acquired");

            self.held_locks
                .lock()
                .await
                .insert(namespace.to_string(), conn);
            Ok(())
        })
    }

    fn unlock<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(mut conn) = self.held_locks.lock().await.remove(namespace) else {
                if self.advisory_lock {
                    warn!(namespace, "Unlock requested without a held lock");
                }
                return Ok(());
            };

            let released = sqlx::query("SELECT pg_advisory_unlock($1, hashtext($2))")
                .bind(LOCK_CLASS)
                .bind(namespace)
                .execute(&mut *conn)
                .await;

            if let Err(e) = released {
                // Ending the session drops every advisory lock it holds
                if let Err(close_err) = conn.close().await {
                    warn!(namespace, error = %close_err, "Failed to close lock connection");
                }
                return Err(StratumError::VersionStore(format!(
                    "Failed to release migration lock for '{}': {}",
                    namespace, e
                )));
            }

            debug!(namespace, "Migration lock released");
            Ok(())
        })
    }
}

fn to_version(namespace: &str, stored: i32) -> Result<u32> {
    u32::try_from(stored).map_err(|_| {
        StratumError::VersionStore(format!(
            "Stored version {} of '{}' is negative",
            stored, namespace
        ))
    })
}

/// Accepts `name` or `schema.name` made of ASCII identifier characters.
fn validate_table_name(table: &str) -> Result<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            && part.len() <= 63
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| valid_part(p)) {
        return Err(StratumError::Config(format!(
            "Invalid version table name '{}'",
            table
        )));
    }
    Ok(())
}

fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            namespace VARCHAR(255) PRIMARY KEY,
            version INTEGER NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        table
    )
}

fn select_version_sql(table: &str) -> String {
    format!("SELECT version FROM {} WHERE namespace = $1", table)
}

fn upsert_version_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {} (namespace, version, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (namespace) DO UPDATE
        SET version = EXCLUDED.version, updated_at = EXCLUDED.updated_at
        "#,
        table
    )
}

fn select_records_sql(table: &str) -> String {
    format!(
        "SELECT namespace, version, updated_at FROM {} ORDER BY namespace",
        table
    )
}
