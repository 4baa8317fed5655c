//! Namespace and object-type name validation.
//!
//! Valid names:
//! - Must be non-empty and at most [`MAX_NAME_LEN`] bytes
//! - Must start with an ASCII letter or `_`
//! - May contain only ASCII letters, digits, `_` and `-`
//!
//! The `.` character is reserved as the separator of a fully-qualified
//! `namespace.name` pair, so it never appears in either half.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Maximum length of a namespace or object-type name, in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// Separator between namespace and object name in a full type name.
pub const SEPARATOR: char = '.';

/// Validate a namespace or object-type name, returning `Ok(())` if valid.
///
/// # Examples
///
/// ```
/// use ostore_types::validate_name;
///
/// assert!(validate_name("Orders").is_ok());
/// assert!(validate_name("order_lines-v2").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("a.b").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    let invalid = |reason: String| TypeError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "name is {} bytes, limit is {MAX_NAME_LEN}",
            name.len()
        )));
    }

    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(invalid(format!(
                "must start with a letter or '_', found {first:?}"
            )));
        }
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(invalid(format!("contains forbidden character: {ch:?}")));
    }

    Ok(())
}

/// Fully-qualified identity of an object type: `namespace.name`.
///
/// The full name keys every per-type structure: version records, ID
/// counters, container paths and cache buckets.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectTypeName {
    namespace: String,
    name: String,
}

impl ObjectTypeName {
    /// Build a validated type name from its two halves.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, TypeError> {
        let namespace = namespace.into();
        let name = name.into();
        validate_name(&namespace)?;
        validate_name(&name)?;
        Ok(Self { namespace, name })
    }

    /// Parse a `namespace.name` string.
    pub fn parse(full_name: &str) -> Result<Self, TypeError> {
        let (namespace, name) =
            full_name
                .split_once(SEPARATOR)
                .ok_or_else(|| TypeError::InvalidName {
                    name: full_name.to_string(),
                    reason: format!("expected 'namespace{SEPARATOR}name'"),
                })?;
        Self::new(namespace, name)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `namespace.name` form.
    pub fn full_name(&self) -> String {
        format!("{}{SEPARATOR}{}", self.namespace, self.name)
    }

    /// Full name as a sibling type in the same namespace.
    pub fn sibling(&self, name: &str) -> Result<Self, TypeError> {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Debug for ObjectTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectTypeName({}{SEPARATOR}{})", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectTypeName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
