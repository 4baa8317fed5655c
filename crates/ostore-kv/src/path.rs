use crate::error::{KvError, KvResult};

/// Join a root and a name into a container path.
pub fn container_path(root: &str, name: &str) -> String {
    if root.is_empty() {
        name.to_string()
    } else {
        format!("{root}/{name}")
    }
}

/// Validate a container path: non-empty `/`-separated segments, none of
/// which is `.` or `..` or contains a backslash.
pub fn validate_path(path: &str) -> KvResult<()> {
    let invalid = |reason: &str| KvError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };
    if path.is_empty() {
        return Err(invalid("path must not be empty"));
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(invalid("path segments must not be empty"));
        }
        if segment == "." || segment == ".." {
            return Err(invalid("relative segments are not allowed"));
        }
        if segment.contains('\\') {
            return Err(invalid("backslash is not allowed"));
        }
    }
    Ok(())
}
