use std::cmp::Ordering;
use std::io::Read;
use std::str::FromStr;

use fnv::FnvHasher;
use std::hash::Hasher as _;

use crate::error::{CairnError, Result};
use crate::object::{ObjectId, ObjectWriter};
use crate::upload::source::EntryMetadata;

/// 64-bit FNV-1a hash over the metadata fields that invalidate a cached
/// object ID when they change.
pub fn metadata_hash(path_name: &str, metadata: &EntryMetadata) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(path_name.as_bytes());
    hasher.write(&metadata.mtime_ns.to_le_bytes());
    hasher.write(&metadata.mode.to_le_bytes());
    hasher.write(&metadata.size.to_le_bytes());
    hasher.write(&metadata.uid.to_le_bytes());
    hasher.write(&metadata.gid.to_le_bytes());
    hasher.finish()
}

/// One `{path, metadata-hash, object-id}` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashCacheEntry {
    pub path: String,
    pub hash: u64,
    pub object_id: ObjectId,
}

/// Compare two `/`-separated relative paths in upload traversal order.
///
/// Within a directory, subdirectory subtrees are uploaded before regular
/// entries, so a path component that still has children sorts before any
/// leaf component of the same directory. Entries in a cache stream are
/// totally ordered by this relation, which is what makes the forward cursor
/// and binary search in [`HashCacheReader`] correct.
pub fn traversal_cmp(a: &str, b: &str) -> Ordering {
    let mut a_parts = a.split('/').peekable();
    let mut b_parts = b.split('/').peekable();

    loop {
        match (a_parts.next(), b_parts.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a_comp), Some(b_comp)) => {
                // A component with children is a directory and sorts before
                // any leaf of the same parent.
                let a_leaf = a_parts.peek().is_none();
                let b_leaf = b_parts.peek().is_none();
                match (a_leaf, b_leaf, a_comp.cmp(b_comp)) {
                    (false, true, _) if a_comp != b_comp => return Ordering::Less,
                    (true, false, _) if a_comp != b_comp => return Ordering::Greater,
                    (_, _, Ordering::Equal) => continue,
                    (_, _, ordering) => return ordering,
                }
            }
        }
    }
}

/// Decodes a hash-cache object into sorted entries and serves lookups with
/// a forward cursor — upload paths arrive in traversal (sorted) order, so a
/// lookup never has to move backwards.
#[derive(Debug)]
pub struct HashCacheReader {
    entries: Vec<HashCacheEntry>,
    pos: usize,
}

impl HashCacheReader {
    /// An empty cache (first upload, or unreadable previous cache).
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            pos: 0,
        }
    }

    /// Decode a cache stream. Fails with `MalformedData` on a truncated or
    /// out-of-order stream.
    pub fn open(mut reader: impl Read) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let mut entries = Vec::new();
        let mut cursor = 0usize;
        while cursor < data.len() {
            let (entry, next) = decode_entry(&data, cursor)?;
            if let Some(last) = entries.last() {
                let last: &HashCacheEntry = last;
                if traversal_cmp(&last.path, &entry.path) != Ordering::Less {
                    return Err(CairnError::MalformedData(format!(
                        "hash cache entries out of order at '{}'",
                        entry.path
                    )));
                }
            }
            entries.push(entry);
            cursor = next;
        }

        Ok(Self { entries, pos: 0 })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the entry for `path`, consuming every entry that sorts at or
    /// before it. Returns `None` when the path has no cached entry.
    pub fn find_entry(&mut self, path: &str) -> Option<&HashCacheEntry> {
        // Entries are sorted in traversal order, so the target position is a
        // binary search over the unconsumed tail.
        let tail = &self.entries[self.pos..];
        let idx = tail.partition_point(|e| traversal_cmp(&e.path, path) == Ordering::Less);
        self.pos += idx;

        if self.pos < self.entries.len() && self.entries[self.pos].path == path {
            let entry = &self.entries[self.pos];
            self.pos += 1;
            return Some(entry);
        }
        None
    }

    /// Copy all entries the cursor has not consumed into `writer`. Used on
    /// cancellation to preserve forward progress for the next run.
    pub fn copy_to(&mut self, writer: &mut HashCacheWriter) -> Result<()> {
        while self.pos < self.entries.len() {
            writer.write_entry(&self.entries[self.pos])?;
            self.pos += 1;
        }
        Ok(())
    }
}

fn decode_entry(data: &[u8], mut cursor: usize) -> Result<(HashCacheEntry, usize)> {
    let truncated = || CairnError::MalformedData("truncated hash cache entry".into());

    let read_u16 = |cursor: &mut usize| -> Result<u16> {
        let bytes: [u8; 2] = data
            .get(*cursor..*cursor + 2)
            .ok_or_else(truncated)?
            .try_into()
            .map_err(|_| truncated())?;
        *cursor += 2;
        Ok(u16::from_le_bytes(bytes))
    };

    let path_len = read_u16(&mut cursor)? as usize;
    let path_bytes = data.get(cursor..cursor + path_len).ok_or_else(truncated)?;
    cursor += path_len;
    let path = std::str::from_utf8(path_bytes)
        .map_err(|_| CairnError::MalformedData("hash cache path is not UTF-8".into()))?
        .to_string();

    let hash_bytes: [u8; 8] = data
        .get(cursor..cursor + 8)
        .ok_or_else(truncated)?
        .try_into()
        .map_err(|_| truncated())?;
    cursor += 8;
    let hash = u64::from_le_bytes(hash_bytes);

    let id_len = read_u16(&mut cursor)? as usize;
    let id_bytes = data.get(cursor..cursor + id_len).ok_or_else(truncated)?;
    cursor += id_len;
    let id_str = std::str::from_utf8(id_bytes)
        .map_err(|_| CairnError::MalformedData("hash cache object ID is not UTF-8".into()))?;
    let object_id = ObjectId::from_str(id_str)?;

    Ok((
        HashCacheEntry {
            path,
            hash,
            object_id,
        },
        cursor,
    ))
}

/// Appends length-prefixed entries, in ascending path order, to an object
/// writer.
pub struct HashCacheWriter {
    writer: ObjectWriter,
    last_path: Option<String>,
}

impl HashCacheWriter {
    pub fn new(writer: ObjectWriter) -> Self {
        Self {
            writer,
            last_path: None,
        }
    }

    pub fn write_entry(&mut self, entry: &HashCacheEntry) -> Result<()> {
        if let Some(last) = &self.last_path {
            if traversal_cmp(last, &entry.path) != Ordering::Less {
                return Err(CairnError::MalformedData(format!(
                    "hash cache entries must be written in path order: '{}' after '{last}'",
                    entry.path
                )));
            }
        }

        let id_str = entry.object_id.to_string();
        let mut buf =
            Vec::with_capacity(2 + entry.path.len() + 8 + 2 + id_str.len());
        buf.extend_from_slice(&(entry.path.len() as u16).to_le_bytes());
        buf.extend_from_slice(entry.path.as_bytes());
        buf.extend_from_slice(&entry.hash.to_le_bytes());
        buf.extend_from_slice(&(id_str.len() as u16).to_le_bytes());
        buf.extend_from_slice(id_str.as_bytes());
        self.writer.write(&buf)?;

        self.last_path = Some(entry.path.clone());
        Ok(())
    }

    /// Finish the cache object and return its ID.
    pub fn finalize(mut self) -> Result<ObjectId> {
        self.writer.result()
    }
}
