use std::fmt;

use super::DirectoryEntry;

/// Typed subset of LDAP search filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(attr=value)`, case-insensitive match.
    Eq(String, String),
    /// `(attr=*)`.
    Present(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq(attr.into(), value.into())
    }

    pub fn present(attr: impl Into<String>) -> Self {
        Self::Present(attr.into())
    }

    pub fn negate(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Evaluate the filter against an entry.
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Self::Eq(attr, value) => entry.has_value(attr, value),
            Self::Present(attr) => entry.has_attr(attr),
            Self::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Self::Not(filter) => !filter.matches(entry),
        }
    }
}

/// Renders RFC 4515 string form.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq(attr, value) => write!(f, "({}={})", attr, escape(value)),
            Self::Present(attr) => write!(f, "({}=*)", attr),
            Self::And(filters) => {
                write!(f, "(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            Self::Or(filters) => {
                write!(f, "(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            Self::Not(filter) => write!(f, "(!{})", filter),
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            other => out.push(other),
        }
    }
    out
}
