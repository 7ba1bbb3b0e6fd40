//! Key→blob persistence contract.
//!
//! The node keypair, its membership token, and durable topic state go
//! through this interface. Anything fancier (browser key stores,
//! encrypted vaults) is an external collaborator implementing the same
//! two calls.

use crate::errors::IdentityError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Minimal durable store: `put` overwrites, `get` returns `None` for
/// missing keys.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IdentityError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IdentityError>;
}

/// In-memory store for ephemeral identities and tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IdentityError> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| IdentityError::Store("memory store poisoned".into()))?;
        blobs.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IdentityError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| IdentityError::Store("memory store poisoned".into()))?;
        Ok(blobs.get(key).cloned())
    }
}

/// Flat-file store: one file per key under a base directory.
///
/// Keys are hex-encoded into file names so any key string is safe.
#[derive(Debug)]
pub struct FileBlobStore {
    base_dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| IdentityError::Store(format!("create {}: {e}", base_dir.display())))?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.blob", hex::encode(key)))
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IdentityError> {
        let path = self.path_for(key);
        std::fs::write(&path, value)
            .map_err(|e| IdentityError::Store(format!("write {}: {e}", path.display())))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IdentityError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IdentityError::Store(format!("read {}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.put("k", b"value").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();
        store.put("identity/keypair", b"seed").unwrap();
        assert_eq!(store.get("identity/keypair").unwrap(), Some(b"seed".to_vec()));
        assert_eq!(store.get("missing").unwrap(), None);
    }
}
