use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};
use crate::object::{ObjectId, ObjectWriter};
use crate::upload::source::EntryMetadata;

/// One row of a directory manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    #[serde(flatten)]
    pub metadata: EntryMetadata,
    pub object_id: ObjectId,
}

/// Streams a JSON array of directory entries into an object writer.
/// Entry order is the caller's traversal order, which makes directory
/// object IDs reproducible.
pub struct DirectoryWriter {
    writer: ObjectWriter,
    count: usize,
}

impl DirectoryWriter {
    pub fn new(writer: ObjectWriter) -> Self {
        Self { writer, count: 0 }
    }

    pub fn write_entry(&mut self, entry: &DirEntry) -> Result<()> {
        let mut buf = if self.count == 0 {
            b"[".to_vec()
        } else {
            b",".to_vec()
        };
        buf.extend_from_slice(&serde_json::to_vec(entry)?);
        self.writer.write(&buf)?;
        self.count += 1;
        Ok(())
    }

    /// Close the array and return the directory's object ID.
    pub fn finalize(mut self) -> Result<ObjectId> {
        if self.count == 0 {
            self.writer.write(b"[")?;
        }
        self.writer.write(b"]")?;
        self.writer.result()
    }
}

/// Parse a directory object's contents back into entries.
pub fn parse_directory(data: &[u8]) -> Result<Vec<DirEntry>> {
    serde_json::from_slice(data)
        .map_err(|e| CairnError::MalformedData(format!("directory manifest: {e}")))
}
