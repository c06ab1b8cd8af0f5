//! # Path Safety
//!
//! Every object key comes from an untrusted URL. [`resolve_key`] is the one
//! place that turns a key into a filesystem path; upload, download, head and
//! the garbage collector all go through it.
//!
//! Only canonical keys are accepted, so the key string that is signed and
//! recorded in the stores names exactly one file.

use std::path::{Path, PathBuf};

use super::errors::{StorageError, StorageResult};

/// Resolve `key` under `root`.
///
/// A key is one or more `/`-separated segments. Segments must not be empty,
/// `.` or `..`, and must not contain NUL or a backslash. A leading or
/// trailing slash yields an empty segment and is rejected too.
pub fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    let invalid = || StorageError::InvalidPath(key.to_string());

    if key.is_empty() {
        return Err(invalid());
    }

    for segment in key.split('/') {
        if segment.is_empty()
            || segment == "."
            || segment == ".."
            || segment.contains('\0')
            || segment.contains('\\')
        {
            return Err(invalid());
        }
    }

    let resolved = root.join(key);
    if resolved.starts_with(root) && resolved != root {
        Ok(resolved)
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/srv/storage/uploads")
    }

    #[test]
    fn test_nested_key_accepted() {
        let path = resolve_key(&root(), "a/b.png").unwrap();
        assert_eq!(path, PathBuf::from("/srv/storage/uploads/a/b.png"));

        let dotted = resolve_key(&root(), "v1.2/.hidden/..name").unwrap();
        assert_eq!(dotted, PathBuf::from("/srv/storage/uploads/v1.2/.hidden/..name"));
    }

    #[test]
    fn test_non_canonical_keys_rejected() {
        for key in ["a/./b.txt", "a//c.txt", "./a", "a/", "a/c/../b.png", "a\\..\\b"] {
            assert!(
                matches!(resolve_key(&root(), key), Err(StorageError::InvalidPath(_))),
                "{:?} must be rejected",
                key
            );
        }
    }

    #[test]
    fn test_traversal_rejected() {
        for key in ["../../etc/passwd", "..", "a/../../x", "/etc/passwd", "../uploads2/x"] {
            assert!(
                matches!(resolve_key(&root(), key), Err(StorageError::InvalidPath(_))),
                "{} must be rejected",
                key
            );
        }
    }

    #[test]
    fn test_root_itself_rejected() {
        for key in ["", ".", "a/..", "./", "/"] {
            assert!(resolve_key(&root(), key).is_err(), "{:?} must be rejected", key);
        }
    }

    #[test]
    fn test_sibling_with_shared_prefix_rejected() {
        // "/srv/storage/uploads-evil" starts with the root string but is outside it
        assert!(resolve_key(&root(), "../uploads-evil/x").is_err());
    }

    #[test]
    fn test_nul_rejected() {
        assert!(resolve_key(&root(), "a\0b").is_err());
    }
}
