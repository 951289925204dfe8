//! Relational schema of the message indexing store.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use stratum_core::error::Result;
use stratum_core::migration::{MigrationContext, MigrationUnit, Outcome, UnitInfo};

use crate::registry::MigrationRegistry;

pub const NAMESPACE: &str = "indexing";

const INDEXING_TABLE: &str = "mapistore_indexing";

const CREATE_INDEXING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS mapistore_indexing (
    id SERIAL PRIMARY KEY,
    username VARCHAR(1024) NOT NULL,
    fmid VARCHAR(36) NOT NULL,
    url VARCHAR(1024) NOT NULL,
    soft_deleted VARCHAR(36) NOT NULL
)
"#;

const CREATE_INDEXES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS mapistore_indexes (
    id SERIAL PRIMARY KEY,
    username VARCHAR(1024) NOT NULL,
    next_fmid VARCHAR(36) NOT NULL
)
"#;

const TABLE_EXISTS: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema = current_schema() AND table_name = $1
)
"#;

const DROP_TABLES: [&str; 2] = [
    "DROP TABLE IF EXISTS mapistore_indexes",
    "DROP TABLE IF EXISTS mapistore_indexing",
];

/// Register every unit of the `indexing` namespace.
pub fn register(registry: &mut MigrationRegistry) -> Result<()> {
    registry.register(Arc::new(InitialIndexing))
}

/// v1: create the indexing tables.
pub struct InitialIndexing;

impl InitialIndexing {
    async fn create_tables(ctx: &MigrationContext) -> Result<Outcome> {
        let pool = ctx.db()?;

        let exists: bool = sqlx::query_scalar(TABLE_EXISTS)
            .bind(INDEXING_TABLE)
            .fetch_one(pool)
            .await?;
        if exists {
            return Ok(Outcome::skipped(format!("{} already exists", INDEXING_TABLE)));
        }

        let mut tx = pool.begin().await?;
        for statement in [CREATE_INDEXING_TABLE, CREATE_INDEXES_TABLE] {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Created indexing tables");
        Ok(Outcome::success())
    }

    async fn drop_tables(ctx: &MigrationContext) -> Result<Outcome> {
        let pool = ctx.db()?;

        let mut tx = pool.begin().await?;
        for statement in DROP_TABLES {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Dropped indexing tables");
        Ok(Outcome::success())
    }
}

impl MigrationUnit for InitialIndexing {
    fn info(&self) -> UnitInfo {
        UnitInfo::new(NAMESPACE, 1, "initial")
    }

    fn apply<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
        Box::pin(async move { Outcome::from_result(Self::create_tables(ctx).await) })
    }

    fn unapply<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
        Box::pin(async move { Outcome::from_result(Self::drop_tables(ctx).await) })
    }
}
