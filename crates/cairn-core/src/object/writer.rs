use std::sync::Arc;

use tracing::debug;

use crate::block::BlockManager;
use crate::chunker::{Splitter, SplitterKind};
use crate::error::{CairnError, Result};
use crate::hashing::ContentHash;
use crate::object::id::{ObjectId, MAX_INDIRECT_LEVELS};
use crate::object::IndirectEntry;

/// Options for a single object write.
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    /// Human-readable tag for logging only; not part of the object.
    pub description: String,
}

/// Streams bytes through the splitter into the block layer and produces a
/// root object ID.
///
/// Identical input bytes produce identical object IDs for a given chunker
/// and hasher, regardless of write granularity.
pub struct ObjectWriter {
    blocks: Arc<BlockManager>,
    splitter: Box<dyn Splitter>,
    splitter_kind: SplitterKind,
    max_block_size: usize,
    description: String,
    /// Indirection depth of this writer; table writers nest one level deeper.
    level: u32,
    chunks: Vec<(ContentHash, u64)>,
    pending: Vec<Vec<u8>>,
}

impl ObjectWriter {
    pub(crate) fn new(
        blocks: Arc<BlockManager>,
        splitter_kind: SplitterKind,
        max_block_size: usize,
        options: WriterOptions,
        level: u32,
    ) -> Self {
        Self {
            splitter: splitter_kind.new_splitter(max_block_size),
            blocks,
            splitter_kind,
            max_block_size,
            description: options.description,
            level,
            chunks: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Append bytes to the object. May hand zero or more completed chunks to
    /// the block layer.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.splitter.push(data, &mut self.pending);
        self.commit_pending()
    }

    fn commit_pending(&mut self) -> Result<()> {
        for chunk in self.pending.drain(..) {
            let hash = self.blocks.write_block(&chunk)?;
            self.chunks.push((hash, chunk.len() as u64));
        }
        Ok(())
    }

    /// Finish the object: flush the splitter's tail chunk and reduce the
    /// recorded chunk list to a single root ID, indirecting recursively
    /// when more than one chunk was produced.
    pub fn result(&mut self) -> Result<ObjectId> {
        self.splitter.finish(&mut self.pending);
        self.commit_pending()?;

        match self.chunks.len() {
            0 => {
                // Zero-byte object: a single empty chunk.
                let hash = self.blocks.write_block(&[])?;
                Ok(ObjectId::direct(hash))
            }
            1 => Ok(ObjectId::direct(self.chunks[0].0)),
            n => {
                if self.level >= MAX_INDIRECT_LEVELS {
                    return Err(CairnError::MalformedData(format!(
                        "indirection depth exceeds {MAX_INDIRECT_LEVELS}"
                    )));
                }

                let mut entries = Vec::with_capacity(n);
                let mut start = 0u64;
                for (hash, length) in self.chunks.drain(..) {
                    entries.push(IndirectEntry {
                        start,
                        length,
                        object_id: ObjectId::direct(hash),
                    });
                    start += length;
                }
                let table = serde_json::to_vec(&entries)?;
                debug!(
                    description = %self.description,
                    children = n,
                    level = self.level,
                    "writing indirect object table"
                );

                let mut table_writer = ObjectWriter::new(
                    Arc::clone(&self.blocks),
                    self.splitter_kind,
                    self.max_block_size,
                    WriterOptions {
                        description: format!("INDIRECT:{}", self.description),
                    },
                    self.level + 1,
                );
                table_writer.write(&table)?;
                table_writer.result()?.indirect()
            }
        }
    }
}
