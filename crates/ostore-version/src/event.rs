/// Notification raised after a version change is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionEvent {
    /// The type's version advanced to `version`.
    Changed { object_type: String, version: u32 },
    /// The type's version record was removed.
    Removed { object_type: String },
}

impl VersionEvent {
    pub fn object_type(&self) -> &str {
        match self {
            Self::Changed { object_type, .. } | Self::Removed { object_type } => object_type,
        }
    }
}
