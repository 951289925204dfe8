use thiserror::Error;

/// Core error type for stratum operations.
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Version store error: {0}")]
    VersionStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A unit was registered twice for the same namespace and version.
    #[error("Duplicate migration version {version} in namespace '{namespace}'")]
    DuplicateVersion { namespace: String, version: u32 },

    /// Versions start at 1; 0 is reserved for "never migrated".
    #[error("Invalid migration version {version} in namespace '{namespace}'")]
    InvalidVersion { namespace: String, version: u32 },

    /// A unit's apply or unapply failed. The run stopped at this unit.
    #[error("Migration {namespace} v{version} ({description}) failed: {cause}")]
    UnitExecution {
        namespace: String,
        version: u32,
        description: String,
        #[source]
        cause: Box<StratumError>,
    },

    /// Rollback was requested across a unit that forbids it.
    #[error("Migration {namespace} v{version} ({description}) is not reversible")]
    Irreversible {
        namespace: String,
        version: u32,
        description: String,
    },
}

impl StratumError {
    /// Version of the unit that blocked progress, if this error names one.
    pub fn blocking_version(&self) -> Option<u32> {
        match self {
            Self::UnitExecution { version, .. } | Self::Irreversible { version, .. } => {
                Some(*version)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StratumError {
    fn from(e: serde_json::Error) -> Self {
        StratumError::Serialization(e.to_string())
    }
}

/// Result type alias using StratumError.
pub type Result<T> = std::result::Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_execution_message_names_unit() {
        let err = StratumError::UnitExecution {
            namespace: "indexing".into(),
            version: 2,
            description: "add index".into(),
            cause: Box::new(StratumError::Database("relation exists".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("indexing v2"));
        assert!(msg.contains("add index"));
        assert!(msg.contains("relation exists"));
        assert_eq!(err.blocking_version(), Some(2));
    }

    #[test]
    fn test_blocking_version_absent_for_infrastructure_errors() {
        let err = StratumError::VersionStore("connection reset".into());
        assert_eq!(err.blocking_version(), None);
    }

    #[test]
    fn test_json_error_converts_to_serialization() {
        let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err: StratumError = json_err.into();
        assert!(matches!(err, StratumError::Serialization(_)));
    }
}
