mod context;
mod outcome;
mod report;
mod traits;

pub use context::{
    Backend, DirectoryContext, DirectoryCredentials, MigrationContext, NamingContext,
    RelationalContext,
};
pub use outcome::{Outcome, RecordWarning};
pub use report::{
    AppliedOutcome, AppliedUnit, Direction, MigrationResult, MigrationStatus, Target, UnitSummary,
};
pub use traits::{MigrationUnit, UnitInfo};
