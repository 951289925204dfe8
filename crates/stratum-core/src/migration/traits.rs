use futures::future::BoxFuture;

use crate::error::StratumError;

use super::context::MigrationContext;
use super::outcome::Outcome;

/// Trait for migration units.
///
/// A unit is identified by `(namespace, version)` and is immutable once
/// registered. `apply` should detect work that is already done and skip it,
/// so that re-running a unit after a partial failure is safe.
pub trait MigrationUnit: Send + Sync + 'static {
    /// Get unit metadata.
    fn info(&self) -> UnitInfo;

    /// Bring the store from the previous version to this one.
    fn apply<'a>(&'a self, ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome>;

    /// Revert this unit.
    ///
    /// Only called when [`UnitInfo::reversible`] is set. Units that do not
    /// override it refuse, so a missing revert step never lowers the version.
    fn unapply<'a>(&'a self, _ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
        let refusal = self.info().irreversible_error();
        Box::pin(async move { Outcome::failed(refusal) })
    }
}

/// Unit metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    /// Independent migration track, e.g. `"directory"`.
    pub namespace: String,
    /// Positive, unique within the namespace.
    pub version: u32,
    /// Human-readable summary.
    pub description: String,
    /// Whether `unapply` may be called.
    pub reversible: bool,
}

impl UnitInfo {
    /// Create reversible unit metadata.
    pub fn new(namespace: impl Into<String>, version: u32, description: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version,
            description: description.into(),
            reversible: true,
        }
    }

    /// Mark the unit as irreversible.
    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    /// Error reported when this unit cannot be reverted.
    pub fn irreversible_error(&self) -> StratumError {
        StratumError::Irreversible {
            namespace: self.namespace.clone(),
            version: self.version,
            description: self.description.clone(),
        }
    }
}
