use ostore_types::ObjectTypeName;

/// Structural change raised by the metadata store after it is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataEvent {
    NamespaceAdded(String),
    NamespaceRemoved(String),
    ObjectTypeAdded(ObjectTypeName),
    ObjectTypeRemoved(ObjectTypeName),
}

impl MetadataEvent {
    /// The object type the event concerns, if any.
    pub fn object_type(&self) -> Option<&ObjectTypeName> {
        match self {
            Self::ObjectTypeAdded(t) | Self::ObjectTypeRemoved(t) => Some(t),
            Self::NamespaceAdded(_) | Self::NamespaceRemoved(_) => None,
        }
    }
}
