use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use sqlx::PgPool;

use crate::config::DirectoryConfig;
use crate::directory::DirectoryClient;
use crate::error::{Result, StratumError};

/// Context passed unchanged to every unit of a run.
///
/// Owned by the caller and borrowed for the duration of one `migrate` call.
#[derive(Debug)]
pub struct MigrationContext {
    /// Backend the units operate on.
    pub backend: Backend,
    /// Open-ended named parameters. The engine defines no required keys.
    pub extras: HashMap<String, serde_json::Value>,
}

/// Backend adapter handed to units.
#[derive(Debug)]
pub enum Backend {
    Directory(DirectoryContext),
    Relational(RelationalContext),
    /// No backend; units rely on extras only.
    None,
}

impl Backend {
    fn kind(&self) -> &'static str {
        match self {
            Self::Directory(_) => "directory",
            Self::Relational(_) => "relational",
            Self::None => "none",
        }
    }
}

impl MigrationContext {
    pub fn directory(ctx: DirectoryContext) -> Self {
        Self::with_backend(Backend::Directory(ctx))
    }

    pub fn relational(pool: PgPool) -> Self {
        Self::with_backend(Backend::Relational(RelationalContext { pool }))
    }

    /// Context without a backend.
    pub fn bare() -> Self {
        Self::with_backend(Backend::None)
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            extras: HashMap::new(),
        }
    }

    /// Attach a named extra.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extras.get(key)
    }

    /// Deserialize a named extra into `T`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    pub fn extra_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.extras.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Directory adapter, or a `Backend` error if this run is not directory-backed.
    pub fn directory_backend(&self) -> Result<&DirectoryContext> {
        match &self.backend {
            Backend::Directory(ctx) => Ok(ctx),
            other => Err(StratumError::Backend(format!(
                "expected directory backend, found {}",
                other.kind()
            ))),
        }
    }

    /// Relational adapter, or a `Backend` error if this run is not relational.
    pub fn relational_backend(&self) -> Result<&RelationalContext> {
        match &self.backend {
            Backend::Relational(ctx) => Ok(ctx),
            other => Err(StratumError::Backend(format!(
                "expected relational backend, found {}",
                other.kind()
            ))),
        }
    }

    /// Shortcut for the relational pool.
    pub fn db(&self) -> Result<&PgPool> {
        self.relational_backend().map(|ctx| &ctx.pool)
    }
}

/// Relational adapter.
#[derive(Debug, Clone)]
pub struct RelationalContext {
    pub pool: PgPool,
}

/// Directory adapter: a client plus the naming context of the domain.
#[derive(Clone)]
pub struct DirectoryContext {
    pub client: Arc<dyn DirectoryClient>,
    pub naming: NamingContext,
    pub credentials: Option<DirectoryCredentials>,
}

impl DirectoryContext {
    pub fn new(client: Arc<dyn DirectoryClient>, domain_dn: impl Into<String>) -> Self {
        Self {
            client,
            naming: NamingContext::new(domain_dn),
            credentials: None,
        }
    }

    pub fn from_config(client: Arc<dyn DirectoryClient>, config: &DirectoryConfig) -> Self {
        let credentials = match (&config.bind_dn, &config.bind_password) {
            (Some(bind_dn), Some(password)) => Some(DirectoryCredentials {
                bind_dn: bind_dn.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Self {
            client,
            naming: NamingContext::new(config.domain_dn.clone()),
            credentials,
        }
    }

    pub fn client(&self) -> &dyn DirectoryClient {
        self.client.as_ref()
    }
}

impl fmt::Debug for DirectoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryContext")
            .field("naming", &self.naming)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Well-known DNs of a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingContext {
    pub domain_dn: String,
}

impl NamingContext {
    pub fn new(domain_dn: impl Into<String>) -> Self {
        Self {
            domain_dn: domain_dn.into(),
        }
    }

    pub fn users_dn(&self) -> String {
        format!("CN=Users,{}", self.domain_dn)
    }

    pub fn configuration_dn(&self) -> String {
        format!("CN=Configuration,{}", self.domain_dn)
    }

    pub fn schema_dn(&self) -> String {
        format!("CN=Schema,{}", self.configuration_dn())
    }
}

/// Bind credentials for the directory.
#[derive(Clone)]
pub struct DirectoryCredentials {
    pub bind_dn: String,
    pub password: String,
}

impl fmt::Debug for DirectoryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryCredentials")
            .field("bind_dn", &self.bind_dn)
            .field("password", &"***")
            .finish()
    }
}
