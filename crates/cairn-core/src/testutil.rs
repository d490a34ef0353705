use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::chunker::SplitterKind;
use crate::config::{MetadataEncryption, RepositoryOptions};
use crate::error::{CairnError, Result};
use crate::hashing::HashAlgorithm;
use crate::repo::Repository;
use crate::storage::BlobStore;

/// In-memory blob store for testing. Clones share the same map, so a test
/// can keep a handle and inspect blobs written through the repository.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_count(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn blob_names(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }

    /// Overwrite a blob's bytes directly, bypassing the engine. Used by
    /// tamper-detection tests.
    pub fn corrupt(&self, name: &str, data: &[u8]) {
        self.data
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
    }
}

impl BlobStore for MemoryStore {
    fn put_blob(&self, name: &str, data: &[u8]) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn get_blob(&self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let map = self.data.lock().unwrap();
        let data = map
            .get(name)
            .ok_or_else(|| CairnError::BlockNotFound(name.to_string()))?;
        let start = (offset as usize).min(data.len());
        let end = if length == 0 {
            data.len()
        } else {
            (start + length as usize).min(data.len())
        };
        Ok(data[start..end].to_vec())
    }

    fn list_blobs(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        Ok(map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete_blob(&self, name: &str) -> Result<()> {
        self.data.lock().unwrap().remove(name);
        Ok(())
    }

    fn blob_size(&self, name: &str) -> Result<u64> {
        let map = self.data.lock().unwrap();
        map.get(name)
            .map(|d| d.len() as u64)
            .ok_or_else(|| CairnError::BlockNotFound(name.to_string()))
    }
}

/// Options matching the historical test fixture: fixed 400-byte chunks,
/// HMAC-SHA-256 with an empty secret, no metadata encryption.
pub fn test_options() -> RepositoryOptions {
    RepositoryOptions {
        max_block_size: 400,
        splitter: SplitterKind::Fixed,
        block_format: HashAlgorithm::HmacSha256,
        object_hmac_secret: Some(Vec::new()),
        metadata_encryption: MetadataEncryption::None,
        pack_target_size: 20_000_000,
    }
}

/// Create a repository over a fresh shared [`MemoryStore`].
pub fn test_repo() -> (MemoryStore, Repository) {
    test_repo_with(test_options())
}

pub fn test_repo_with(options: RepositoryOptions) -> (MemoryStore, Repository) {
    let store = MemoryStore::new();
    let repo = Repository::init(Box::new(store.clone()), &options, None)
        .expect("failed to init test repo");
    (store, repo)
}

/// Reopen a repository over an existing shared store.
pub fn reopen(store: &MemoryStore) -> Repository {
    Repository::open(Box::new(store.clone()), None).expect("failed to reopen test repo")
}
