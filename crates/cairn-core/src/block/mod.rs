pub mod index;
pub mod pack;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CompactOptions;
use crate::error::{CairnError, Result};
use crate::hashing::{ContentHash, Hasher};
use crate::storage::{BlobStore, INDEX_BLOB_PREFIX};

use self::index::{merge_index_blobs, encode_index_blob, BlockLocation, PackIndex};
use self::pack::PackBuilder;

/// Counters tracked by the block layer. Incremented atomically so workers
/// can write concurrently.
#[derive(Debug, Default)]
pub struct BlockStats {
    written_blocks: AtomicU64,
    written_bytes: AtomicU64,
    deduped_blocks: AtomicU64,
    read_blocks: AtomicU64,
    read_bytes: AtomicU64,
}

/// Point-in-time copy of [`BlockStats`], embedded in snapshot manifests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatsSnapshot {
    pub written_blocks: u64,
    pub written_bytes: u64,
    pub deduped_blocks: u64,
    pub read_blocks: u64,
    pub read_bytes: u64,
}

impl BlockStats {
    fn snapshot(&self) -> BlockStatsSnapshot {
        BlockStatsSnapshot {
            written_blocks: self.written_blocks.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            deduped_blocks: self.deduped_blocks.load(Ordering::Relaxed),
            read_blocks: self.read_blocks.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
        }
    }
}

/// The block layer: groups chunks into pack blocks, maintains the pack
/// index, and serves verified chunk reads.
///
/// Shared by all object writers and readers. The open pack is single-writer,
/// serialized by a mutex; the index takes a read lock for lookups and an
/// exclusive lock for mutation.
pub struct BlockManager {
    storage: Arc<dyn BlobStore>,
    hasher: Hasher,
    pack: Mutex<PackBuilder>,
    index: RwLock<PackIndex>,
    pack_target_size: usize,
    stats: BlockStats,
}

impl BlockManager {
    pub fn new(storage: Arc<dyn BlobStore>, hasher: Hasher, pack_target_size: usize) -> Self {
        Self {
            storage,
            hasher,
            pack: Mutex::new(PackBuilder::new(pack_target_size)),
            index: RwLock::new(PackIndex::new()),
            pack_target_size,
            stats: BlockStats::default(),
        }
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    pub fn stats(&self) -> BlockStatsSnapshot {
        self.stats.snapshot()
    }

    /// Load all index blobs from storage into the in-memory index.
    pub fn load_indexes(&self) -> Result<usize> {
        let mut index = self.index.write().expect("pack index lock poisoned");
        index.load(&self.storage)
    }

    /// Whether a chunk is already addressable (committed or pending).
    pub fn has_block(&self, hash: &ContentHash) -> bool {
        if self.index.read().expect("pack index lock poisoned").contains(hash) {
            return true;
        }
        self.pack
            .lock()
            .expect("pack builder lock poisoned")
            .pending(hash)
            .is_some()
    }

    /// Store chunk bytes under their content hash, deduplicating against the
    /// index and the open pack. Returns the chunk's hash.
    pub fn write_block(&self, data: &[u8]) -> Result<ContentHash> {
        let hash = self.hasher.hash(data);

        if self.index.read().expect("pack index lock poisoned").contains(&hash) {
            self.stats.deduped_blocks.fetch_add(1, Ordering::Relaxed);
            return Ok(hash);
        }

        let sealed = {
            let mut pack = self.pack.lock().expect("pack builder lock poisoned");
            if pack.pending(&hash).is_some() {
                self.stats.deduped_blocks.fetch_add(1, Ordering::Relaxed);
                return Ok(hash);
            }
            pack.add(hash, data);
            self.stats.written_blocks.fetch_add(1, Ordering::Relaxed);
            self.stats
                .written_bytes
                .fetch_add(data.len() as u64, Ordering::Relaxed);
            if pack.should_flush() {
                pack.seal(&self.hasher)
            } else {
                None
            }
        };

        if let Some(sealed) = sealed {
            self.upload_sealed_pack(sealed)?;
        }
        Ok(hash)
    }

    /// Fetch a chunk by hash. Consults the open pack first, then the index;
    /// every chunk fetched from storage is rehashed before it is returned.
    pub fn get_block(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        {
            let pack = self.pack.lock().expect("pack builder lock poisoned");
            if let Some(entry) = pack.pending(hash) {
                let data = pack.read_pending(&entry).to_vec();
                self.record_read(&data);
                return Ok(data);
            }
        }

        let location = *self
            .index
            .read()
            .expect("pack index lock poisoned")
            .get(hash)
            .ok_or_else(|| CairnError::BlockNotFound(hash.to_hex()))?;

        let data = self.storage.get_blob(
            &location.pack_blob_name(),
            location.offset,
            location.length as u64,
        )?;
        if data.len() != location.length as usize {
            return Err(CairnError::CorruptData(hash.to_hex()));
        }
        if self.hasher.hash(&data) != *hash {
            return Err(CairnError::CorruptData(hash.to_hex()));
        }
        self.record_read(&data);
        Ok(data)
    }

    fn record_read(&self, data: &[u8]) {
        self.stats.read_blocks.fetch_add(1, Ordering::Relaxed);
        self.stats
            .read_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
    }

    /// Seal and upload the open pack, transferring its entries into the
    /// in-memory index as dirty. Data becomes durable; addressability comes
    /// with the next index flush.
    pub fn flush_pack(&self) -> Result<()> {
        let sealed = self
            .pack
            .lock()
            .expect("pack builder lock poisoned")
            .seal(&self.hasher);
        if let Some(sealed) = sealed {
            self.upload_sealed_pack(sealed)?;
        }
        Ok(())
    }

    fn upload_sealed_pack(&self, sealed: pack::SealedPack) -> Result<()> {
        let name = sealed.blob_name();
        self.storage.put_blob(&name, &sealed.bytes)?;
        debug!(pack = %name, chunks = sealed.entries.len(), bytes = sealed.bytes.len(), "uploaded pack");

        let mut index = self.index.write().expect("pack index lock poisoned");
        for entry in sealed.entries {
            index.add(
                entry.hash,
                BlockLocation {
                    pack_id: sealed.pack_id,
                    offset: entry.offset,
                    length: entry.length,
                },
            );
        }
        Ok(())
    }

    /// Flush the open pack, then persist dirty index entries as a blob.
    /// After this returns, every previously written chunk is addressable.
    pub fn flush(&self) -> Result<()> {
        self.flush_pack()?;
        let mut index = self.index.write().expect("pack index lock poisoned");
        index.flush(&self.storage)?;
        Ok(())
    }

    /// Merge small index blobs into one.
    ///
    /// Selects up to `max_small_blocks` of the smallest live index blobs
    /// (no-op below the `min_small_blocks` floor), writes the combined index
    /// first, then deletes the inputs. A crash in between leaves duplicate
    /// entries that the load-time merge rule resolves.
    pub fn compact_indexes(&self, options: CompactOptions) -> Result<usize> {
        let names = self.storage.list_blobs(INDEX_BLOB_PREFIX)?;
        if names.len() < options.min_small_blocks.max(1) {
            return Ok(0);
        }

        let mut sized: Vec<(u64, String)> = Vec::with_capacity(names.len());
        for name in names {
            sized.push((self.storage.blob_size(&name)?, name));
        }
        sized.sort();
        sized.truncate(options.max_small_blocks.max(1));
        let selected: Vec<String> = sized.into_iter().map(|(_, name)| name).collect();

        let merged = merge_index_blobs(&self.storage, &selected)?;
        let (combined_name, data) = encode_index_blob(&merged)?;
        self.storage.put_blob(&combined_name, &data)?;

        let mut deleted = 0;
        for name in &selected {
            if *name == combined_name {
                continue;
            }
            match self.storage.delete_blob(name) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(blob = %name, "failed to delete compacted index blob: {e}"),
            }
        }
        debug!(
            inputs = selected.len(),
            deleted,
            combined = %combined_name,
            "compacted pack indexes"
        );
        Ok(deleted)
    }
}
