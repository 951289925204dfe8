use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use stratum_core::error::{Result, StratumError};
use stratum_core::migration::{MigrationContext, MigrationUnit, Outcome, UnitInfo, UnitSummary};

/// Boxed apply/unapply step for closure-based units.
pub type UnitFn =
    Box<dyn for<'a> Fn(&'a MigrationContext) -> BoxFuture<'a, Outcome> + Send + Sync>;

/// Entry in the migration registry.
pub struct UnitEntry {
    /// Metadata captured at registration.
    pub info: UnitInfo,
    /// The unit itself.
    pub unit: Arc<dyn MigrationUnit>,
}

impl UnitEntry {
    pub fn version(&self) -> u32 {
        self.info.version
    }

    pub fn summary(&self) -> UnitSummary {
        UnitSummary {
            version: self.info.version,
            description: self.info.description.clone(),
            reversible: self.info.reversible,
        }
    }
}

/// Catalog of migration units keyed by namespace and version.
///
/// Built once at startup by explicit registration calls, in any order.
/// Units of a namespace are always served in ascending version order.
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    namespaces: HashMap<String, BTreeMap<u32, Arc<UnitEntry>>>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            namespaces: HashMap::new(),
        }
    }

    /// Register a unit.
    pub fn register(&mut self, unit: Arc<dyn MigrationUnit>) -> Result<()> {
        let info = unit.info();

        if info.version == 0 {
            return Err(StratumError::InvalidVersion {
                namespace: info.namespace,
                version: info.version,
            });
        }

        let units = self.namespaces.entry(info.namespace.clone()).or_default();
        if units.contains_key(&info.version) {
            return Err(StratumError::DuplicateVersion {
                namespace: info.namespace,
                version: info.version,
            });
        }

        debug!(
            namespace = %info.namespace,
            version = info.version,
            description = %info.description,
            "Registered migration unit"
        );
        units.insert(info.version, Arc::new(UnitEntry { info, unit }));
        Ok(())
    }

    /// Register a reversible unit built from two closures.
    pub fn register_fn<A, U>(
        &mut self,
        namespace: impl Into<String>,
        version: u32,
        description: impl Into<String>,
        apply: A,
        unapply: U,
    ) -> Result<()>
    where
        A: for<'a> Fn(&'a MigrationContext) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
        U: for<'a> Fn(&'a MigrationContext) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnUnit {
            info: UnitInfo::new(namespace, version, description),
            apply: Box::new(apply),
            unapply: Some(Box::new(unapply)),
        }))
    }

    /// Register an irreversible unit built from a closure.
    pub fn register_irreversible_fn<A>(
        &mut self,
        namespace: impl Into<String>,
        version: u32,
        description: impl Into<String>,
        apply: A,
    ) -> Result<()>
    where
        A: for<'a> Fn(&'a MigrationContext) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnUnit {
            info: UnitInfo::new(namespace, version, description).irreversible(),
            apply: Box::new(apply),
            unapply: None,
        }))
    }

    /// All units of a namespace, ascending. Empty for unknown namespaces.
    pub fn list(&self, namespace: &str) -> Vec<Arc<UnitEntry>> {
        self.namespaces
            .get(namespace)
            .map(|units| units.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Highest registered version of a namespace.
    pub fn latest(&self, namespace: &str) -> Option<u32> {
        self.namespaces
            .get(namespace)
            .and_then(|units| units.keys().next_back().copied())
    }

    /// Get a unit by namespace and version.
    pub fn get(&self, namespace: &str, version: u32) -> Option<Arc<UnitEntry>> {
        self.namespaces
            .get(namespace)
            .and_then(|units| units.get(&version).cloned())
    }

    /// Check if a namespace has any registered unit.
    pub fn contains_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.namespaces.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Units with `current < version <= target`, ascending.
    pub fn pending(&self, namespace: &str, current: u32, target: u32) -> Vec<Arc<UnitEntry>> {
        if target <= current {
            return Vec::new();
        }
        self.range(namespace, current, target)
    }

    /// Units with `version <= current`, ascending.
    pub fn applied(&self, namespace: &str, current: u32) -> Vec<Arc<UnitEntry>> {
        self.range(namespace, 0, current)
    }

    /// Units with `target < version <= current`, descending.
    pub fn rollback_plan(&self, namespace: &str, current: u32, target: u32) -> Vec<Arc<UnitEntry>> {
        if target >= current {
            return Vec::new();
        }
        let mut units = self.range(namespace, target, current);
        units.reverse();
        units
    }

    /// Highest registered version strictly below `version`, or 0.
    pub fn previous_version(&self, namespace: &str, version: u32) -> u32 {
        self.namespaces
            .get(namespace)
            .and_then(|units| units.range(..version).next_back().map(|(v, _)| *v))
            .unwrap_or(0)
    }

    /// Get the total number of registered units.
    pub fn len(&self) -> usize {
        self.namespaces.values().map(|units| units.len()).sum()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn range(&self, namespace: &str, lower_exclusive: u32, upper_inclusive: u32) -> Vec<Arc<UnitEntry>> {
        if upper_inclusive <= lower_exclusive {
            return Vec::new();
        }
        self.namespaces
            .get(namespace)
            .map(|units| {
                units
                    .range(lower_exclusive + 1..=upper_inclusive)
                    .map(|(_, entry)| entry.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Unit assembled from closures.
struct FnUnit {
    info: UnitInfo,
    apply: UnitFn,
    unapply: Option<UnitFn>,
}

impl MigrationUnit for FnUnit {
    fn info(&self) -> UnitInfo {
        self.info.clone()
    }

    fn apply<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
        (self.apply)(ctx)
    }

    fn unapply<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
        match &self.unapply {
            Some(unapply) => unapply(ctx),
            None => {
                let refusal = self.info.irreversible_error();
                Box::pin(async move { Outcome::failed(refusal) })
            }
        }
    }
}
