use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};

/// Result of running a single unit's `apply` or `unapply`.
#[derive(Debug)]
pub enum Outcome {
    /// The unit completed. Per-record problems are carried as warnings.
    Success(Vec<RecordWarning>),
    /// Nothing to do, the store is already in the desired state.
    Skipped(String),
    /// The unit failed; the run stops here.
    Failed(StratumError),
}

impl Outcome {
    pub fn success() -> Self {
        Self::Success(Vec::new())
    }

    pub fn with_warnings(warnings: Vec<RecordWarning>) -> Self {
        Self::Success(warnings)
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn failed(error: StratumError) -> Self {
        Self::Failed(error)
    }

    /// Collapse a fallible unit body into an outcome.
    ///
    /// Lets unit bodies use `?` and still report through [`Outcome`].
    pub fn from_result(result: Result<Outcome>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(e) => Self::Failed(e),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Non-fatal failure of one record inside a unit's bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWarning {
    /// Identifier of the record (DN, row key, schema step).
    pub record: String,
    pub message: String,
}

impl RecordWarning {
    pub fn new(record: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RecordWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.record, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result() {
        let ok = Outcome::from_result(Ok(Outcome::skipped("exists")));
        assert!(matches!(ok, Outcome::Skipped(ref r) if r == "exists"));

        let err = Outcome::from_result(Err(StratumError::Database("boom".into())));
        assert!(err.is_failed());
    }

    #[test]
    fn test_warning_display() {
        let w = RecordWarning::new("CN=bob", "insufficient access");
        assert_eq!(w.to_string(), "CN=bob: insufficient access");
    }
}
