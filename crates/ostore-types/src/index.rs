use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage type of a secondary index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Integer,
    Float,
    Text,
    Boolean,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

impl std::str::FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(Self::Integer),
            "float" | "double" => Ok(Self::Float),
            "text" | "string" => Ok(Self::Text),
            "boolean" | "bool" => Ok(Self::Boolean),
            other => Err(format!("unknown index kind: {other}")),
        }
    }
}

/// A typed value of one secondary index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl IndexValue {
    /// The index kind this value belongs to.
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Integer(_) => IndexKind::Integer,
            Self::Float(_) => IndexKind::Float,
            Self::Text(_) => IndexKind::Text,
            Self::Boolean(_) => IndexKind::Boolean,
        }
    }

    /// Order two values of the same kind. Values of different kinds are
    /// incomparable and yield `None`.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Parse a literal according to the given kind.
    pub fn parse_as(kind: IndexKind, literal: &str) -> Result<Self, String> {
        match kind {
            IndexKind::Integer => literal
                .parse()
                .map(Self::Integer)
                .map_err(|e| format!("{literal:?} is not an integer: {e}")),
            IndexKind::Float => literal
                .parse()
                .map(Self::Float)
                .map_err(|e| format!("{literal:?} is not a float: {e}")),
            IndexKind::Text => Ok(Self::Text(literal.to_string())),
            IndexKind::Boolean => literal
                .parse()
                .map(Self::Boolean)
                .map_err(|e| format!("{literal:?} is not a boolean: {e}")),
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// Declaration of one secondary index on an object type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// An index value attached to an object, keyed by index name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedIndexValue {
    pub name: String,
    pub value: IndexValue,
}

impl NamedIndexValue {
    pub fn new(name: impl Into<String>, value: IndexValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_kind_values_compare() {
        assert_eq!(
            IndexValue::Integer(1).compare(&IndexValue::Integer(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            IndexValue::Text("b".into()).compare(&IndexValue::Text("a".into())),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn mixed_kinds_are_incomparable() {
        assert_eq!(
            IndexValue::Integer(1).compare(&IndexValue::Text("1".into())),
            None
        );
        assert_eq!(
            IndexValue::Float(f64::NAN).compare(&IndexValue::Float(1.0)),
            None
        );
    }

    #[test]
    fn parse_as_respects_kind() {
        assert_eq!(
            IndexValue::parse_as(IndexKind::Integer, "42").unwrap(),
            IndexValue::Integer(42)
        );
        assert_eq!(
            IndexValue::parse_as(IndexKind::Boolean, "true").unwrap(),
            IndexValue::Boolean(true)
        );
        assert!(IndexValue::parse_as(IndexKind::Integer, "forty-two").is_err());
    }

    #[test]
    fn kind_from_str_accepts_aliases() {
        assert_eq!("int".parse::<IndexKind>().unwrap(), IndexKind::Integer);
        assert_eq!("String".parse::<IndexKind>().unwrap(), IndexKind::Text);
        assert!("blob".parse::<IndexKind>().is_err());
    }

    #[test]
    fn json_shape_names_the_kind() {
        let json = serde_json::to_string(&IndexValue::Integer(2)).unwrap();
        assert_eq!(json, r#"{"integer":2}"#);
    }
}
