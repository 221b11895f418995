//! Path validation.
//!
//! Blob names come from remote ids, revision ids and extensions, none of
//! which this crate controls. Everything handed to a backend goes through
//! [`validate`] first so a hostile id can never address a file outside the
//! storage root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path and returns it normalized.
///
/// `..` components are resolved, but resolving past the root is rejected, as
/// are null bytes, platform prefixes and paths that normalize to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use lake_storage::validate_path;
/// assert!(validate_path("1AbC_0B9x_9e107d9d372bb6826bd81d3542a419d6").is_ok());
/// assert!(validate_path("exports/1AbC_20240102_030405000006.pdf").is_ok());
/// assert!(validate_path("../1AbC_r1").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("./exports//../1AbC_r1/").unwrap(),
///     Path::new("1AbC_r1")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Path::components() lets null bytes through on Unix; the
                // syscalls would truncate at them.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}
