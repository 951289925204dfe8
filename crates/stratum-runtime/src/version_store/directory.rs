use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use stratum_core::config::DirectoryConfig;
use stratum_core::directory::{DirectoryClient, DirectoryEntry, Modification};
use stratum_core::error::{Result, StratumError};
use stratum_core::version::{VersionRecord, VersionStore};

/// Version store kept in the directory itself.
///
/// Versions live in one multi-valued attribute of a well-known entry, one
/// `namespace:version` value per namespace. Each write is a single modify of
/// that entry, which the server applies atomically.
pub struct DirectoryVersionStore {
    client: Arc<dyn DirectoryClient>,
    entry_dn: String,
    attribute: String,
}

impl DirectoryVersionStore {
    pub fn new(
        client: Arc<dyn DirectoryClient>,
        entry_dn: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            client,
            entry_dn: entry_dn.into(),
            attribute: attribute.into(),
        }
    }

    pub fn from_config(client: Arc<dyn DirectoryClient>, config: &DirectoryConfig) -> Self {
        Self::new(client, config.version_entry_dn(), config.version_attribute.clone())
    }

    pub fn entry_dn(&self) -> &str {
        &self.entry_dn
    }

    /// Raw values per namespace. A namespace may carry several values if the
    /// entry was edited by hand.
    async fn load(&self) -> Result<Option<BTreeMap<String, Vec<(String, u32)>>>> {
        let Some(entry) = self.client.read(&self.entry_dn).await? else {
            return Ok(None);
        };

        let mut parsed: BTreeMap<String, Vec<(String, u32)>> = BTreeMap::new();
        for raw in entry.get(&self.attribute).unwrap_or_default() {
            match parse_value(raw) {
                Some((namespace, version)) => parsed
                    .entry(namespace.to_string())
                    .or_default()
                    .push((raw.clone(), version)),
                None => warn!(
                    entry = %self.entry_dn,
                    value = %raw,
                    "Ignoring malformed version value"
                ),
            }
        }
        Ok(Some(parsed))
    }

    fn new_entry(&self, value: String) -> Result<DirectoryEntry> {
        let (rdn_attr, rdn_value) = self
            .entry_dn
            .split(',')
            .next()
            .and_then(|rdn| rdn.split_once('='))
            .ok_or_else(|| {
                StratumError::Config(format!("Invalid version entry DN '{}'", self.entry_dn))
            })?;

        Ok(DirectoryEntry::new(self.entry_dn.clone())
            .with_attr("objectClass", "top")
            .with_attr("objectClass", "container")
            .with_attr(rdn_attr.trim(), rdn_value.trim())
            .with_attr(self.attribute.clone(), value))
    }
}

impl VersionStore for DirectoryVersionStore {
    fn get_version<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<u32>> {
        Box::pin(async move {
            let version = self
                .load()
                .await?
                .and_then(|parsed| {
                    parsed
                        .get(namespace)
                        .and_then(|values| values.iter().map(|(_, v)| *v).max())
                })
                .unwrap_or(0);
            Ok(version)
        })
    }

    fn set_version<'a>(&'a self, namespace: &'a str, version: u32) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let value = format_value(namespace, version);

            let Some(parsed) = self.load().await? else {
                debug!(entry = %self.entry_dn, "Creating version entry");
                return self.client.add(self.new_entry(value)?).await.map_err(|e| {
                    StratumError::VersionStore(format!(
                        "Failed to record version {} of '{}': {}",
                        version, namespace, e
                    ))
                });
            };

            let existing = parsed.get(namespace).cloned().unwrap_or_default();
            if existing.len() == 1 && existing[0].0 == value {
                return Ok(());
            }

            let mut modifications: Vec<Modification> = existing
                .into_iter()
                .map(|(raw, _)| Modification::delete_value(self.attribute.clone(), raw))
                .collect();
            modifications.push(Modification::add(self.attribute.clone(), value));

            self.client
                .modify(&self.entry_dn, modifications)
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
            let records = self
                .load()
                .await?
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(namespace, values)| {
                    values.iter().map(|(_, v)| *v).max().map(|version| VersionRecord {
                        namespace,
                        version,
                        updated_at: None,
                    })
                })
                .collect();
            Ok(records)
        })
    }
}

fn format_value(namespace: &str, version: u32) -> String {
    format!("{}:{}", namespace, version)
}

fn parse_value(raw: &str) -> Option<(&str, u32)> {
    let (namespace, version) = raw.rsplit_once(':')?;
    if namespace.is_empty() {
        return None;
    }
    version.trim().parse().ok().map(|v| (namespace, v))
}
