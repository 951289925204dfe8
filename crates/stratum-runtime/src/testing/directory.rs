use std::collections::{BTreeMap, HashMap};

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use stratum_core::directory::{
    DirectoryClient, DirectoryEntry, Filter, Modification, SearchScope,
};
use stratum_core::error::{Result, StratumError};

/// In-memory directory server.
///
/// Implements [`DirectoryClient`] with LDAP-like semantics: DNs compare
/// case-insensitively, `modify` is all-or-nothing, and adding a value that
/// already exists fails. Failures can be injected per DN to exercise
/// record-level error handling.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<BTreeMap<String, DirectoryEntry>>,
    write_failures: RwLock<HashMap<String, String>>,
    search_failures: RwLock<HashMap<String, String>>,
    schema_refreshes: RwLock<usize>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-populated with entries.
    pub fn with_entries(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (normalize(&entry.dn), entry))
            .collect();

        Self {
            entries: RwLock::new(entries),
            ..Default::default()
        }
    }

    /// Make every `add` or `modify` of `dn` fail with `message`.
    pub async fn fail_on(&self, dn: &str, message: impl Into<String>) {
        self.write_failures
            .write()
            .await
            .insert(normalize(dn), message.into());
    }

    /// Make every search based at `base` fail with `message`.
    pub async fn fail_search(&self, base: &str, message: impl Into<String>) {
        self.search_failures
            .write()
            .await
            .insert(normalize(base), message.into());
    }

    pub async fn clear_failures(&self) {
        self.write_failures.write().await.clear();
        self.search_failures.write().await.clear();
    }

    /// Snapshot of an entry.
    pub async fn entry(&self, dn: &str) -> Option<DirectoryEntry> {
        self.entries.read().await.get(&normalize(dn)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of `refresh_schema` calls so far.
    pub async fn schema_refreshes(&self) -> usize {
        *self.schema_refreshes.read().await
    }

    async fn check_write(&self, dn: &str) -> Result<()> {
        match self.write_failures.read().await.get(&normalize(dn)) {
            Some(message) => Err(StratumError::Directory(message.clone())),
            None => Ok(()),
        }
    }
}

impl DirectoryClient for MemoryDirectory {
    fn search<'a>(
        &'a self,
        base: &'a str,
        scope: SearchScope,
        filter: &'a Filter,
    ) -> BoxFuture<'a, Result<Vec<DirectoryEntry>>> {
        Box::pin(async move {
            let base_key = normalize(base);
            if let Some(message) = self.search_failures.read().await.get(&base_key) {
                return Err(StratumError::Directory(message.clone()));
            }

            let entries = self.entries.read().await;
            Ok(entries
                .iter()
                .filter(|(dn, _)| in_scope(dn, &base_key, scope))
                .filter(|(_, entry)| filter.matches(entry))
                .map(|(_, entry)| entry.clone())
                .collect())
        })
    }

    fn add(&self, entry: DirectoryEntry) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check_write(&entry.dn).await?;

            let mut entries = self.entries.write().await;
            let key = normalize(&entry.dn);
            if entries.contains_key(&key) {
                return Err(StratumError::Directory(format!(
                    "Entry already exists: {}",
                    entry.dn
                )));
            }
            entries.insert(key, entry);
            Ok(())
        })
    }

    fn modify<'a>(
        &'a self,
        dn: &'a str,
        modifications: Vec<Modification>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_write(dn).await?;

            let mut entries = self.entries.write().await;
            let key = normalize(dn);
            let current = entries
                .get(&key)
                .ok_or_else(|| StratumError::Directory(format!("No such object: {}", dn)))?;

            // Work on a copy so a failing modification leaves the entry untouched.
            let mut updated = current.clone();
            for modification in modifications {
                apply_modification(&mut updated, modification)?;
            }
            entries.insert(key, updated);
            Ok(())
        })
    }

    fn refresh_schema(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.schema_refreshes.write().await += 1;
            Ok(())
        })
    }
}

fn apply_modification(entry: &mut DirectoryEntry, modification: Modification) -> Result<()> {
    match modification {
        Modification::Add { attr, values } => {
            for value in values {
                if entry.has_value(&attr, &value) {
                    return Err(StratumError::Directory(format!(
                        "Attribute or value exists: {}={}",
                        attr, value
                    )));
                }
                entry.add_value(attr.clone(), value);
            }
        }
        Modification::Replace { attr, values } => {
            remove_attr(entry, &attr);
            for value in values {
                entry.add_value(attr.clone(), value);
            }
        }
        Modification::Delete { attr, values } => {
            if !entry.has_attr(&attr) {
                return Err(StratumError::Directory(format!(
                    "No such attribute: {}",
                    attr
                )));
            }
            if values.is_empty() {
                remove_attr(entry, &attr);
            } else {
                for value in values {
                    if !entry.has_value(&attr, &value) {
                        return Err(StratumError::Directory(format!(
                            "No such value: {}={}",
                            attr, value
                        )));
                    }
                    if let Some(existing) = entry
                        .attributes
                        .iter_mut()
                        .find(|(name, _)| name.eq_ignore_ascii_case(&attr))
                        .map(|(_, values)| values)
                    {
                        existing.retain(|v| !v.eq_ignore_ascii_case(&value));
                    }
                }
                entry.attributes.retain(|_, values| !values.is_empty());
            }
        }
    }
    Ok(())
}

fn remove_attr(entry: &mut DirectoryEntry, attr: &str) {
    entry
        .attributes
        .retain(|name, _| !name.eq_ignore_ascii_case(attr));
}

fn normalize(dn: &str) -> String {
    dn.split(',')
        .map(|part| part.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => dn
            .split_once(',')
            .map(|(_, parent)| parent == base)
            .unwrap_or(false),
        SearchScope::Subtree => dn == base || dn.ends_with(&format!(",{}", base)),
    }
}
