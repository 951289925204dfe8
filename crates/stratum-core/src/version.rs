//! Version-store contract.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Durable per-namespace record of the last applied version.
///
/// The runner is the only caller that writes. `set_version` must be atomic
/// with respect to concurrent readers of the same namespace.
pub trait VersionStore: Send + Sync {
    /// Current version, `0` if the namespace was never migrated.
    fn get_version<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<u32>>;

    /// Persist the version for a namespace.
    fn set_version<'a>(&'a self, namespace: &'a str, version: u32) -> BoxFuture<'a, Result<()>>;

    /// Every stored record.
    fn records(&self) -> BoxFuture<'_, Result<Vec<VersionRecord>>>;

    /// Take an exclusive lock on the namespace for the duration of a run.
    fn lock<'a>(&'a self, _namespace: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Release a lock taken with [`VersionStore::lock`].
    fn unlock<'a>(&'a self, _namespace: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// A stored version record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub namespace: String,
    pub version: u32,
    pub updated_at: Option<DateTime<Utc>>,
}
