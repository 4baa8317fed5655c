use serde::{Deserialize, Serialize};

use crate::index::{IndexDefinition, IndexKind};

/// Per-object-type schema: index definitions and dependency list.
///
/// `dependencies` name other object types in the same namespace. When a
/// dependency's version advances, this type's version advances with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeSchema {
    pub name: String,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Generate a random unique key for objects stored without one.
    #[serde(default)]
    pub requires_unique_key: bool,
}

impl ObjectTypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
            dependencies: Vec::new(),
            requires_unique_key: false,
        }
    }

    pub fn with_index(mut self, name: impl Into<String>, kind: IndexKind) -> Self {
        self.indexes.push(IndexDefinition::new(name, kind));
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_unique_key(mut self) -> Self {
        self.requires_unique_key = true;
        self
    }

    /// Look up an index definition by name.
    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d == name)
    }
}
