use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use stratum_core::error::Result;
use stratum_core::version::{VersionRecord, VersionStore};

/// In-process version store for tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryVersionStore {
    records: Arc<RwLock<HashMap<String, VersionRecord>>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with existing versions.
    pub fn with_versions<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let now = Utc::now();
        let records = versions
            .into_iter()
            .map(|(namespace, version)| {
                let namespace = namespace.into();
                let record = VersionRecord {
                    namespace: namespace.clone(),
                    version,
                    updated_at: Some(now),
                };
                (namespace, record)
            })
            .collect();

        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }
}

impl VersionStore for MemoryVersionStore {
    fn get_version<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<u32>> {
        Box::pin(async move {
            let records = self.records.read().await;
            Ok(records.get(namespace).map(|r| r.version).unwrap_or(0))
        })
    }

    fn set_version<'a>(&'a self, namespace: &'a str, version: u32) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.write().await;
            records.insert(
                namespace.to_string(),
                VersionRecord {
                    namespace: namespace.to_string(),
                    version,
                    updated_at: Some(Utc::now()),
                },
            );
            Ok(())
        })
    }

    fn records(&self) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let records = self.records.read().await;
            let mut all: Vec<VersionRecord> = records.values().cloned().collect();
            all.sort_by(|a, b| a.namespace.cmp(&b.namespace));
            Ok(all)
        })
    }
}
