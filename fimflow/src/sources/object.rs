//! Object storage seam for optional catalog export.

use super::SourceError;
use std::path::{Path, PathBuf};

/// Key/value byte storage.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), SourceError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, SourceError>;
}

/// Directory-backed object store; keys map to relative paths.
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are slash-separated; strip any leading slash so joins stay
        // inside the root.
        self.root.join(key.trim_start_matches('/'))
    }
}

impl ObjectStore for DirObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), SourceError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, SourceError> {
        Ok(std::fs::read(self.path_for(key))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = DirObjectStore::new(dir.path());
        store.put("library/2823932/120-nd.tif", b"grid").unwrap();
        assert_eq!(store.get("library/2823932/120-nd.tif").unwrap(), b"grid");
    }

    #[test]
    fn test_missing_key_errors() {
        let dir = tempdir().unwrap();
        let store = DirObjectStore::new(dir.path());
        assert!(store.get("absent").is_err());
    }
}
