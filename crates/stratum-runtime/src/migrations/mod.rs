//! Built-in migration units.

pub mod directory;
pub mod indexing;

use stratum_core::error::Result;

use crate::registry::MigrationRegistry;

/// Register every built-in namespace.
pub fn register_builtin(registry: &mut MigrationRegistry) -> Result<()> {
    directory::register(registry)?;
    indexing::register(registry)?;
    Ok(())
}
