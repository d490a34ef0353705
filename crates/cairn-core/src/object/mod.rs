pub mod id;
pub mod reader;
pub mod writer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use id::ObjectId;
pub use reader::ObjectReader;
pub use writer::{ObjectWriter, WriterOptions};

use crate::block::BlockManager;
use crate::chunker::SplitterKind;
use crate::error::Result;

/// One row of an indirect object's JSON table: a child object covering
/// `length` bytes of the logical stream starting at `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndirectEntry {
    #[serde(rename = "s")]
    pub start: u64,
    #[serde(rename = "l")]
    pub length: u64,
    #[serde(rename = "o")]
    pub object_id: ObjectId,
}

/// The object layer: turns byte streams into content-addressed objects and
/// opens them back as seekable readers.
pub struct ObjectManager {
    blocks: Arc<BlockManager>,
    splitter: SplitterKind,
    max_block_size: usize,
}

impl ObjectManager {
    pub fn new(blocks: Arc<BlockManager>, splitter: SplitterKind, max_block_size: usize) -> Self {
        Self {
            blocks,
            splitter,
            max_block_size,
        }
    }

    /// Start writing a new object.
    pub fn new_writer(&self, options: WriterOptions) -> ObjectWriter {
        ObjectWriter::new(
            Arc::clone(&self.blocks),
            self.splitter,
            self.max_block_size,
            options,
            0,
        )
    }

    /// Open an object for reading and seeking.
    pub fn open(&self, id: &ObjectId) -> Result<ObjectReader> {
        ObjectReader::open(Arc::clone(&self.blocks), id)
    }

    /// Make object data durable by flushing the open pack. Chunk hashes
    /// become addressable once the block layer persists its index (the
    /// subsequent `BlockManager::flush`).
    pub fn flush(&self) -> Result<()> {
        self.blocks.flush_pack()
    }
}
