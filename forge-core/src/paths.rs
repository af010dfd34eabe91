//! Path helpers shared by the HTTP gateway and the CLI.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path validation failed: {0}")]
    Validation(String),
}

/// Lexically clean a slash separated path: collapse repeated separators,
/// drop `.` elements and resolve `..` against the preceding element. A
/// rooted path never climbs above the root. Returns "." for an empty result.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for element in path.split('/') {
        match element {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Whether a request path survives cleaning unchanged. Trailing slashes are
/// tolerated.
pub fn is_clean_request_path(path: &str) -> bool {
    let trimmed = path.trim_end_matches('/');
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    clean_path(trimmed) == trimmed
}

/// On-disk location of an owner's repository
pub fn repo_path(repos_root: &Path, owner: &str, name: &str) -> PathBuf {
    let name = name.to_lowercase();
    let name = if name.ends_with(".git") {
        name
    } else {
        format!("{}.git", name)
    };
    repos_root.join(owner.to_lowercase()).join(name)
}

/// Check that `path`, with symlinks resolved, lies inside `base`.
pub fn validate_path_within_base(path: &Path, base: &Path) -> Result<PathBuf, PathError> {
    let canonical_base = base
        .canonicalize()
        .map_err(|err| PathError::Validation(format!("Failed to canonicalize base path: {}", err)))?;

    let canonical_path = path
        .canonicalize()
        .map_err(|err| PathError::Validation(format!("Failed to canonicalize path: {}", err)))?;

    if !canonical_path.starts_with(&canonical_base) {
        return Err(PathError::Validation(format!(
            "Path {:?} is not within base {:?}",
            canonical_path, canonical_base
        )));
    }

    Ok(canonical_path)
}

/// Check if a name is usable as a single path component
pub fn is_safe_path_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains('\0')
        && !component.contains('/')
        && !component.contains('\\')
}
