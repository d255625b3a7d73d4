//! Content hashing for change detection.
//!
//! Hashes file bytes with blake3 and remembers which paths it has seen,
//! so the impact analyzer can distinguish brand-new files from edits.
//! Hash comparison downstream is always on the hex digest string.

use ahash::AHashSet;
use std::path::{Path, PathBuf};

use crate::errors::VigilError;

/// Content hasher with a seen-path set.
#[derive(Debug, Default)]
pub struct Hasher {
    seen: AHashSet<PathBuf>,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a file's current contents.
    ///
    /// # Returns
    /// `(hex_digest, is_new)` where `is_new` is true iff the path was
    /// unknown to the seen-set before this call.
    ///
    /// # Errors
    /// A nonexistent or unreadable file returns a validation error with the
    /// underlying I/O message; it never panics.
    pub fn hash_file(&mut self, path: &Path) -> Result<(String, bool), VigilError> {
        let bytes = std::fs::read(path).map_err(|e| {
            VigilError::validation("hash-file", path.display(), e.to_string())
        })?;
        let is_new = self.seen.insert(path.to_path_buf());
        Ok((hash_bytes(&bytes), is_new))
    }

    /// Whether the hasher has seen this path before.
    pub fn has_seen(&self, path: &Path) -> bool {
        self.seen.contains(path)
    }

    /// Mark a path as seen without hashing it (initial scan baseline).
    pub fn mark_seen(&mut self, path: &Path) {
        self.seen.insert(path.to_path_buf());
    }

    /// Drop a deleted path from the seen-set.
    pub fn forget(&mut self, path: &Path) {
        self.seen.remove(path);
    }

    /// Number of paths in the seen-set.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

/// Hex blake3 digest of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_bytes(b"package foo"), hash_bytes(b"package foo"));
        assert_ne!(hash_bytes(b"package foo"), hash_bytes(b"package bar"));
    }

    #[test]
    fn test_first_hash_is_new() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("foo.go");
        fs::write(&path, b"package foo").unwrap();

        let mut hasher = Hasher::new();
        let (digest, is_new) = hasher.hash_file(&path).unwrap();
        assert!(is_new);
        assert_eq!(digest.len(), 64);

        let (digest2, is_new2) = hasher.hash_file(&path).unwrap();
        assert!(!is_new2);
        assert_eq!(digest, digest2);
    }

    #[test]
    fn test_missing_file_is_error() {
        let mut hasher = Hasher::new();
        let err = hasher.hash_file(Path::new("/no/such/file.go")).unwrap_err();
        assert!(matches!(err, VigilError::Validation { .. }));
    }

    #[test]
    fn test_forget_resets_is_new() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("foo.go");
        fs::write(&path, b"package foo").unwrap();

        let mut hasher = Hasher::new();
        hasher.hash_file(&path).unwrap();
        assert!(hasher.has_seen(&path));

        hasher.forget(&path);
        assert!(!hasher.has_seen(&path));

        let (_, is_new) = hasher.hash_file(&path).unwrap();
        assert!(is_new);
    }

    #[test]
    fn test_mark_seen_baseline() {
        let mut hasher = Hasher::new();
        hasher.mark_seen(Path::new("a/b.go"));
        assert!(hasher.has_seen(Path::new("a/b.go")));
        assert_eq!(hasher.seen_count(), 1);
    }
}
