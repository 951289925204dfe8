pub mod config;
pub mod directory;
pub mod error;
pub mod migration;
pub mod version;

pub use config::StratumConfig;
pub use directory::{DirectoryClient, DirectoryEntry, Filter, Modification, SearchScope};
pub use error::{Result, StratumError};
pub use migration::{
    AppliedOutcome, AppliedUnit, Backend, Direction, DirectoryContext, MigrationContext,
    MigrationResult, MigrationStatus, MigrationUnit, Outcome, RecordWarning, Target, UnitInfo,
    UnitSummary,
};
pub use version::{VersionRecord, VersionStore};
