//! Directory service client contract.
//!
//! The engine never talks to a directory server itself. Applications hand in
//! a [`DirectoryClient`] implementation wrapping their LDAP library of choice;
//! directory-backed migration units and the directory version store only use
//! the primitives below.

mod filter;

pub use filter::Filter;

use std::collections::BTreeMap;

use futures::future::BoxFuture;

use crate::error::Result;

/// Scope of a directory search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Only the base entry.
    Base,
    /// Direct children of the base entry.
    OneLevel,
    /// The base entry and everything below it.
    Subtree,
}

/// A directory entry: a DN plus multi-valued attributes.
///
/// Attribute names are stored as given; lookups are case-insensitive, as
/// they are on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute append.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_value(name, value);
        self
    }

    /// Append a value, creating the attribute if needed.
    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = self.attribute_key(&name).unwrap_or(name);
        self.attributes.entry(key).or_default().push(value.into());
    }

    /// All values of an attribute.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attribute_key(name)
            .and_then(|key| self.attributes.get(&key))
            .map(|values| values.as_slice())
    }

    /// First value of an attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(|v| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.get(name).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Whether the attribute holds the given value (case-insensitive).
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.get(name)
            .map(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value)))
            .unwrap_or(false)
    }

    fn attribute_key(&self, name: &str) -> Option<String> {
        self.attributes
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }
}

/// A single change within a modify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Add values to an attribute.
    Add { attr: String, values: Vec<String> },
    /// Replace all values of an attribute.
    Replace { attr: String, values: Vec<String> },
    /// Remove the listed values, or the whole attribute when `values` is empty.
    Delete { attr: String, values: Vec<String> },
}

impl Modification {
    pub fn add(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Add {
            attr: attr.into(),
            values: vec![value.into()],
        }
    }

    pub fn replace(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Replace {
            attr: attr.into(),
            values: vec![value.into()],
        }
    }

    pub fn delete_value(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Delete {
            attr: attr.into(),
            values: vec![value.into()],
        }
    }

    pub fn attr(&self) -> &str {
        match self {
            Self::Add { attr, .. } | Self::Replace { attr, .. } | Self::Delete { attr, .. } => attr,
        }
    }
}

/// Primitives a directory backend must provide.
///
/// A single `modify` call must be applied atomically by the server: either
/// every modification lands or none does.
pub trait DirectoryClient: Send + Sync {
    /// Search below `base` for entries matching `filter`.
    fn search<'a>(
        &'a self,
        base: &'a str,
        scope: SearchScope,
        filter: &'a Filter,
    ) -> BoxFuture<'a, Result<Vec<DirectoryEntry>>>;

    /// Add a new entry. Fails if the DN already exists.
    fn add(&self, entry: DirectoryEntry) -> BoxFuture<'_, Result<()>>;

    /// Apply modifications to an existing entry.
    fn modify<'a>(
        &'a self,
        dn: &'a str,
        modifications: Vec<Modification>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Ask the server to reload its schema after schema entries changed.
    fn refresh_schema(&self) -> BoxFuture<'_, Result<()>>;

    /// Read a single entry by DN.
    fn read<'a>(&'a self, dn: &'a str) -> BoxFuture<'a, Result<Option<DirectoryEntry>>> {
        Box::pin(async move {
            let filter = Filter::present("objectClass");
            let mut entries = self.search(dn, SearchScope::Base, &filter).await?;
            Ok(entries.pop())
        })
    }
}
