use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{CairnError, Result};
use crate::hashing::ContentHash;
use crate::storage::{BlobStore, INDEX_BLOB_PREFIX, PACK_BLOB_PREFIX};

/// Where a chunk lives: which pack blob, and at what offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    pub pack_id: ContentHash,
    pub offset: u64,
    pub length: u32,
}

impl BlockLocation {
    pub fn pack_blob_name(&self) -> String {
        format!("{PACK_BLOB_PREFIX}{}", self.pack_id.to_hex())
    }
}

/// On-disk index document: one or more packs, each with its sorted entries.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexFile {
    packs: Vec<IndexFilePack>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexFilePack {
    id: ContentHash,
    entries: Vec<IndexFileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexFileEntry {
    h: ContentHash,
    o: u64,
    l: u32,
}

/// In-memory pack index: sorted map chunk hash → location, plus the set of
/// entries not yet persisted to an index blob.
#[derive(Debug, Default)]
pub struct PackIndex {
    entries: BTreeMap<ContentHash, BlockLocation>,
    dirty: BTreeSet<ContentHash>,
}

impl PackIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&BlockLocation> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Record a freshly packed chunk; it stays dirty until `flush`.
    pub fn add(&mut self, hash: ContentHash, location: BlockLocation) {
        self.entries.insert(hash, location);
        self.dirty.insert(hash);
    }

    /// Merge entries loaded from an index blob (never dirty).
    fn merge_loaded(&mut self, file: IndexFile) {
        for pack in file.packs {
            for entry in pack.entries {
                self.entries.insert(
                    entry.h,
                    BlockLocation {
                        pack_id: pack.id,
                        offset: entry.o,
                        length: entry.l,
                    },
                );
            }
        }
    }

    /// Load all index blobs from storage, merging in ascending blob-name
    /// order so the lexicographically greatest blob wins conflicts.
    pub fn load(&mut self, store: &dyn BlobStore) -> Result<usize> {
        let mut names = store.list_blobs(INDEX_BLOB_PREFIX)?;
        names.sort();
        let count = names.len();
        for name in names {
            let data = store.get_blob(&name, 0, 0)?;
            let file = decode_index_blob(&data)
                .map_err(|e| CairnError::MalformedData(format!("index blob '{name}': {e}")))?;
            self.merge_loaded(file);
        }
        debug!(
            blobs = count,
            entries = self.entries.len(),
            "loaded pack indexes"
        );
        Ok(count)
    }

    /// Persist dirty entries as a new immutable index blob; clears the dirty
    /// set. No-op when nothing is dirty.
    pub fn flush(&mut self, store: &dyn BlobStore) -> Result<Option<String>> {
        if self.dirty.is_empty() {
            return Ok(None);
        }

        let mut by_pack: BTreeMap<ContentHash, Vec<IndexFileEntry>> = BTreeMap::new();
        for hash in &self.dirty {
            let loc = self.entries[hash];
            by_pack.entry(loc.pack_id).or_default().push(IndexFileEntry {
                h: *hash,
                o: loc.offset,
                l: loc.length,
            });
        }
        let file = IndexFile {
            packs: by_pack
                .into_iter()
                .map(|(id, entries)| IndexFilePack { id, entries })
                .collect(),
        };

        let (name, data) = encode_index_blob(&file)?;
        store.put_blob(&name, &data)?;
        debug!(blob = %name, entries = self.dirty.len(), "flushed pack index");
        self.dirty.clear();
        Ok(Some(name))
    }
}

/// Serialize an index document as gzipped JSON; the blob name is the hash of
/// the compressed bytes under the index prefix.
pub(crate) fn encode_index_blob(file: &IndexFile) -> Result<(String, Vec<u8>)> {
    let json = serde_json::to_vec(file)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    let mut digest = Sha256::new();
    digest.update(&compressed);
    let name = format!("{INDEX_BLOB_PREFIX}{}", hex::encode(digest.finalize()));
    Ok((name, compressed))
}

pub(crate) fn decode_index_blob(data: &[u8]) -> Result<IndexFile> {
    let mut decoder = GzDecoder::new(data);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| CairnError::MalformedData(format!("gzip: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| CairnError::MalformedData(format!("json: {e}")))
}

/// Merge the contents of several index blobs into one document, applying the
/// greatest-blob-name-wins rule, and return it with all entries included.
pub(crate) fn merge_index_blobs(
    store: &dyn BlobStore,
    names: &[String],
) -> Result<IndexFile> {
    let mut sorted = names.to_vec();
    sorted.sort();

    let mut merged: BTreeMap<ContentHash, BlockLocation> = BTreeMap::new();
    for name in &sorted {
        let data = store.get_blob(name, 0, 0)?;
        let file = decode_index_blob(&data)
            .map_err(|e| CairnError::MalformedData(format!("index blob '{name}': {e}")))?;
        for pack in file.packs {
            for entry in pack.entries {
                merged.insert(
                    entry.h,
                    BlockLocation {
                        pack_id: pack.id,
                        offset: entry.o,
                        length: entry.l,
                    },
                );
            }
        }
    }

    let mut by_pack: BTreeMap<ContentHash, Vec<IndexFileEntry>> = BTreeMap::new();
    for (hash, loc) in merged {
        by_pack.entry(loc.pack_id).or_default().push(IndexFileEntry {
            h: hash,
            o: loc.offset,
            l: loc.length,
        });
    }
    Ok(IndexFile {
        packs: by_pack
            .into_iter()
            .map(|(id, entries)| IndexFilePack { id, entries })
            .collect(),
    })
}
