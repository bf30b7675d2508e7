//! Path containment and output bounding.
//!
//! Prevents crafted identifiers or filenames from escaping their
//! configured directories, and keeps captured process/HTTP output
//! to a bounded size before it lands in an outcome.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use super::error::StepError;

/// Maximum characters of stdout/stderr kept from the transform
pub const MAX_CAPTURED_OUTPUT: usize = 500;

/// Maximum characters of an ERP/relay response body kept in an outcome
pub const MAX_RESPONSE_EXCERPT: usize = 300;

/// Resolve `name` inside `root`, refusing anything that escapes it.
///
/// The root is canonicalized when it exists. The joined path is
/// normalized lexically (the target usually does not exist yet) and must
/// remain a strict descendant of the root. If the target does exist it is
/// canonicalized as well, so a symlink pointing outside the root is
/// rejected too.
pub fn resolve_within(root: &Path, name: &str) -> Result<PathBuf, StepError> {
    let base = canonical_or_absolute(root)?;
    let target = normalize_lexically(&base.join(name));

    if target == base || !target.starts_with(&base) {
        return Err(traversal(name, &base));
    }

    match target.canonicalize() {
        Ok(real) if !real.starts_with(&base) => Err(traversal(name, &base)),
        Ok(real) => Ok(real),
        Err(_) => Ok(target),
    }
}

fn traversal(name: &str, base: &Path) -> StepError {
    warn!(
        target: "security",
        requested = %name,
        root = %base.display(),
        "Path traversal attempt blocked"
    );
    StepError::PathTraversal {
        requested: name.to_string(),
        root: base.display().to_string(),
    }
}

fn canonical_or_absolute(root: &Path) -> Result<PathBuf, StepError> {
    if let Ok(canonical) = root.canonicalize() {
        return Ok(canonical);
    }

    std::path::absolute(root)
        .map(|abs| normalize_lexically(&abs))
        .map_err(|e| StepError::io(format!("Cannot resolve {}", root.display()), e))
}

/// Collapse `.` and `..` components without touching the filesystem
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}

/// Check a bare filename received from a remote caller.
///
/// Rejects empty names, parent-directory sequences, and either path
/// separator, before anything touches the filesystem.
pub fn check_filename(name: &str) -> Result<(), StepError> {
    let invalid = name.trim().is_empty()
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name.contains(':');

    if invalid {
        warn!(target: "security", filename = %name, "Rejected unsafe filename");
        return Err(StepError::InvalidFilename(name.to_string()));
    }

    Ok(())
}

/// Truncate to at most `max` characters, respecting char boundaries
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
