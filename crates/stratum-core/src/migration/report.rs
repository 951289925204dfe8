use std::fmt;

use serde::{Deserialize, Serialize};

use super::outcome::RecordWarning;
use crate::error::{Result, StratumError};

/// Direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version a run should end at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Highest registered version. Only valid for `Up`.
    Latest,
    Version(u32),
}

impl From<Option<u32>> for Target {
    fn from(value: Option<u32>) -> Self {
        value.map(Target::Version).unwrap_or(Target::Latest)
    }
}

/// How a unit finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AppliedOutcome {
    Success,
    Skipped { reason: String },
}

/// A unit that completed during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedUnit {
    pub version: u32,
    pub description: String,
    pub outcome: AppliedOutcome,
    pub warnings: Vec<RecordWarning>,
    pub duration_ms: u64,
}

/// Report of a `migrate` call.
///
/// `error` is set when a unit failed, a rollback hit an irreversible unit,
/// or a version write failed mid-run. `final_version` is always the version
/// recorded in the store when the run ended.
#[derive(Debug)]
#[must_use]
pub struct MigrationResult {
    pub namespace: String,
    pub direction: Direction,
    pub initial_version: u32,
    pub final_version: u32,
    pub applied: Vec<AppliedUnit>,
    pub error: Option<StratumError>,
}

impl MigrationResult {
    /// Empty result for a run that starts at `version`.
    pub fn new(namespace: impl Into<String>, direction: Direction, version: u32) -> Self {
        Self {
            namespace: namespace.into(),
            direction,
            initial_version: version,
            final_version: version,
            applied: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the recorded version moved.
    pub fn changed(&self) -> bool {
        self.initial_version != self.final_version
    }

    /// All record-level warnings across applied units.
    pub fn warnings(&self) -> impl Iterator<Item = &RecordWarning> {
        self.applied.iter().flat_map(|unit| unit.warnings.iter())
    }

    /// Turn a failed run into `Err`.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// Snapshot of a namespace for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub namespace: String,
    pub current: u32,
    pub latest: Option<u32>,
    /// Registered units at or below `current`.
    pub applied: Vec<UnitSummary>,
    /// Registered units above `current`, ascending.
    pub pending: Vec<UnitSummary>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Version and description of a registered unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub version: u32,
    pub description: String,
    pub reversible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(version: u32, warnings: Vec<RecordWarning>) -> AppliedUnit {
        AppliedUnit {
            version,
            description: format!("unit {}", version),
            outcome: AppliedOutcome::Success,
            warnings,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_into_result_surfaces_error() {
        let mut result = MigrationResult::new("directory", Direction::Up, 0);
        result.final_version = 1;
        result.error = Some(StratumError::Irreversible {
            namespace: "directory".into(),
            version: 2,
            description: "schema".into(),
        });

        assert!(!result.is_success());
        let err = result.into_result().unwrap_err();
        assert_eq!(err.blocking_version(), Some(2));
    }

    #[test]
    fn test_warnings_are_flattened() {
        let mut result = MigrationResult::new("directory", Direction::Up, 0);
        result.applied.push(applied(1, vec![RecordWarning::new("a", "x")]));
        result.applied.push(applied(2, vec![]));
        result.applied.push(applied(3, vec![RecordWarning::new("b", "y")]));

        let records: Vec<_> = result.warnings().map(|w| w.record.as_str()).collect();
        assert_eq!(records, vec!["a", "b"]);
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_target_from_option() {
        assert_eq!(Target::from(None), Target::Latest);
        assert_eq!(Target::from(Some(4)), Target::Version(4));
    }

    #[test]
    fn test_applied_outcome_serialization() {
        let json = serde_json::to_value(AppliedOutcome::Skipped {
            reason: "table exists".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "table exists");
    }
}
