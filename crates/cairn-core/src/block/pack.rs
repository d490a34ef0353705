use crate::hashing::{ContentHash, Hasher};
use crate::storage::PACK_BLOB_PREFIX;

/// One chunk's position within a pack under construction.
#[derive(Debug, Clone, Copy)]
pub struct PackEntry {
    pub hash: ContentHash,
    pub offset: u64,
    pub length: u32,
}

/// Result of sealing a pack: its ID, the full pack bytes, and the chunk
/// entries to transfer into the pack index.
pub struct SealedPack {
    pub pack_id: ContentHash,
    pub bytes: Vec<u8>,
    pub entries: Vec<PackEntry>,
}

impl SealedPack {
    /// Blob name under which this pack is stored.
    pub fn blob_name(&self) -> String {
        format!("{PACK_BLOB_PREFIX}{}", self.pack_id.to_hex())
    }
}

/// Buffers small chunks into a growing in-memory pack block.
///
/// A pack is the plain concatenation of its chunks; the trailing entry list
/// lives in the pack index, not in the pack itself. Callers must consult the
/// index (and this builder's pending entries) for dedup before `add`.
pub struct PackBuilder {
    target_size: usize,
    buffer: Vec<u8>,
    entries: Vec<PackEntry>,
}

impl PackBuilder {
    pub fn new(target_size: usize) -> Self {
        Self {
            target_size,
            buffer: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Append chunk bytes, recording their location. Returns the offset.
    pub fn add(&mut self, hash: ContentHash, data: &[u8]) -> u64 {
        let offset = self.buffer.len() as u64;
        self.buffer.extend_from_slice(data);
        self.entries.push(PackEntry {
            hash,
            offset,
            length: data.len() as u32,
        });
        offset
    }

    /// Location of a chunk pending in the current pack, if present.
    pub fn pending(&self, hash: &ContentHash) -> Option<PackEntry> {
        self.entries.iter().find(|e| e.hash == *hash).copied()
    }

    /// Read a pending chunk's bytes back out of the open pack.
    pub fn read_pending(&self, entry: &PackEntry) -> &[u8] {
        let start = entry.offset as usize;
        &self.buffer[start..start + entry.length as usize]
    }

    pub fn has_pending(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the open pack has reached its flush threshold.
    pub fn should_flush(&self) -> bool {
        !self.buffer.is_empty() && self.buffer.len() >= self.target_size
    }

    /// Compute the pack ID over the pack bytes and reset to an empty pack.
    /// Does NOT upload; the caller persists `SealedPack::bytes`.
    pub fn seal(&mut self, hasher: &Hasher) -> Option<SealedPack> {
        if self.entries.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        let entries = std::mem::take(&mut self.entries);
        let pack_id = hasher.hash(&bytes);
        Some(SealedPack {
            pack_id,
            bytes,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{HashAlgorithm, Hasher};

    fn hasher() -> Hasher {
        Hasher::new(HashAlgorithm::HmacSha256, b"")
    }

    #[test]
    fn add_records_offsets() {
        let h = hasher();
        let mut pack = PackBuilder::new(1000);
        assert_eq!(pack.add(h.hash(b"aaa"), b"aaa"), 0);
        assert_eq!(pack.add(h.hash(b"bbbb"), b"bbbb"), 3);
        assert_eq!(pack.buffered_bytes(), 7);
    }

    #[test]
    fn should_flush_on_target() {
        let h = hasher();
        let mut pack = PackBuilder::new(10);
        assert!(!pack.should_flush());
        pack.add(h.hash(b"12345"), b"12345");
        assert!(!pack.should_flush());
        pack.add(h.hash(b"67890"), b"67890");
        assert!(pack.should_flush());
    }

    #[test]
    fn pending_lookup_and_readback() {
        let h = hasher();
        let mut pack = PackBuilder::new(1000);
        let hash = h.hash(b"hello");
        pack.add(hash, b"hello");

        let entry = pack.pending(&hash).unwrap();
        assert_eq!(entry.length, 5);
        assert_eq!(pack.read_pending(&entry), b"hello");
        assert!(pack.pending(&h.hash(b"other")).is_none());
    }

    #[test]
    fn seal_resets_state() {
        let h = hasher();
        let mut pack = PackBuilder::new(1000);
        pack.add(h.hash(b"data"), b"data");

        let sealed = pack.seal(&h).unwrap();
        assert_eq!(sealed.bytes, b"data");
        assert_eq!(sealed.entries.len(), 1);
        assert_eq!(sealed.pack_id, h.hash(b"data"));
        assert!(sealed.blob_name().starts_with('P'));

        assert!(!pack.has_pending());
        assert!(pack.seal(&h).is_none());
    }
}
