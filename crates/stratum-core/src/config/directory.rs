use serde::{Deserialize, Serialize};

/// Directory store configuration.
///
/// The directory client itself is supplied by the embedding application;
/// this only carries naming and version-record placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base DN of the domain, e.g. `DC=example,DC=com`.
    pub domain_dn: String,

    /// DN used to bind, if the client needs explicit credentials.
    #[serde(default)]
    pub bind_dn: Option<String>,

    /// Password for `bind_dn`.
    #[serde(default)]
    pub bind_password: Option<String>,

    /// Entry holding the version records. Defaults to
    /// `CN=Stratum,CN=Configuration,<domain_dn>`.
    #[serde(default)]
    pub version_entry: Option<String>,

    /// Multi-valued attribute holding one `namespace:version` value per namespace.
    #[serde(default = "default_version_attribute")]
    pub version_attribute: String,
}

impl DirectoryConfig {
    /// Create a configuration for the given domain with defaults.
    pub fn new(domain_dn: impl Into<String>) -> Self {
        Self {
            domain_dn: domain_dn.into(),
            bind_dn: None,
            bind_password: None,
            version_entry: None,
            version_attribute: default_version_attribute(),
        }
    }

    /// DN of the entry holding version records.
    pub fn version_entry_dn(&self) -> String {
        self.version_entry
            .clone()
            .unwrap_or_else(|| format!("CN=Stratum,CN=Configuration,{}", self.domain_dn))
    }
}

fn default_version_attribute() -> String {
    "stratumMigrationVersion".to_string()
}
