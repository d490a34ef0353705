use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::block::BlockManager;
use crate::error::{CairnError, Result};
use crate::object::id::ObjectId;
use crate::object::IndirectEntry;

/// Seekable reader over a stored object.
///
/// Direct objects stream a single verified chunk. Indirect objects present
/// the concatenation of their children; the child covering the current
/// position is located by binary search over the table and opened lazily.
pub struct ObjectReader {
    inner: Inner,
}

enum Inner {
    Direct {
        data: Vec<u8>,
        pos: u64,
    },
    Indirect {
        blocks: Arc<BlockManager>,
        table: Vec<IndirectEntry>,
        total_len: u64,
        pos: u64,
        /// Lazily opened child for the current position.
        current: Option<(usize, Box<ObjectReader>)>,
    },
}

impl ObjectReader {
    pub(crate) fn open(blocks: Arc<BlockManager>, id: &ObjectId) -> Result<Self> {
        match id {
            ObjectId::Null => Err(CairnError::InvalidObjectId("null".into())),
            ObjectId::Block { level: 0, hash } => {
                let data = blocks.get_block(hash)?;
                Ok(Self {
                    inner: Inner::Direct { data, pos: 0 },
                })
            }
            id => {
                let parent = id
                    .parent()
                    .ok_or_else(|| CairnError::InvalidObjectId(id.to_string()))?;
                let mut table_reader = ObjectReader::open(Arc::clone(&blocks), &parent)?;
                let mut table_json = Vec::new();
                table_reader.read_to_end(&mut table_json)?;

                let table: Vec<IndirectEntry> = serde_json::from_slice(&table_json)
                    .map_err(|e| {
                        CairnError::MalformedData(format!("indirect table for {id}: {e}"))
                    })?;

                let total_len = validate_table(&table, id)?;
                Ok(Self {
                    inner: Inner::Indirect {
                        blocks,
                        table,
                        total_len,
                        pos: 0,
                        current: None,
                    },
                })
            }
        }
    }

    /// Total object length in bytes.
    pub fn len(&self) -> u64 {
        match &self.inner {
            Inner::Direct { data, .. } => data.len() as u64,
            Inner::Indirect { total_len, .. } => *total_len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Check the table is contiguous from offset 0; returns the total length.
fn validate_table(table: &[IndirectEntry], id: &ObjectId) -> Result<u64> {
    let mut expected_start = 0u64;
    for entry in table {
        if entry.start != expected_start || entry.object_id.is_null() {
            return Err(CairnError::MalformedData(format!(
                "indirect table for {id}: discontiguous entry at offset {}",
                entry.start
            )));
        }
        expected_start += entry.length;
    }
    Ok(expected_start)
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            Inner::Direct { data, pos } => {
                let start = (*pos).min(data.len() as u64) as usize;
                let n = (data.len() - start).min(buf.len());
                buf[..n].copy_from_slice(&data[start..start + n]);
                *pos += n as u64;
                Ok(n)
            }
            Inner::Indirect {
                blocks,
                table,
                total_len,
                pos,
                current,
            } => {
                if buf.is_empty() || *pos >= *total_len {
                    return Ok(0);
                }

                // Child containing `pos`: last entry whose start <= pos.
                let idx = table.partition_point(|e| e.start <= *pos) - 1;

                let reuse = matches!(current, Some((i, _)) if *i == idx);
                if !reuse {
                    let child = ObjectReader::open(Arc::clone(blocks), &table[idx].object_id)
                        .map_err(std::io::Error::other)?;
                    *current = Some((idx, Box::new(child)));
                }
                let (_, child) = current.as_mut().expect("child reader just installed");

                let offset_in_child = *pos - table[idx].start;
                child.seek(SeekFrom::Start(offset_in_child))?;
                let n = child.read(buf)?;
                if n == 0 {
                    // Child shorter than its table entry claims.
                    return Err(std::io::Error::other(CairnError::MalformedData(format!(
                        "short child object at offset {}",
                        table[idx].start
                    ))));
                }
                *pos += n as u64;
                Ok(n)
            }
        }
    }
}

impl Seek for ObjectReader {
    fn seek(&mut self, seek_from: SeekFrom) -> std::io::Result<u64> {
        let len = self.len();
        let pos = match &mut self.inner {
            Inner::Direct { pos, .. } => pos,
            Inner::Indirect { pos, .. } => pos,
        };
        let new_pos = match seek_from {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => len as i64 + delta,
            SeekFrom::Current(delta) => *pos as i64 + delta,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of object",
            ));
        }
        *pos = new_pos as u64;
        Ok(*pos)
    }
}
