use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};
use crate::platform::fs::summarize_metadata;

/// Metadata captured for every entry handed to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub mode: u32,
    pub mtime_ns: i64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

/// A filesystem entry presented to the uploader. The traversal primitives
/// behind these traits are external collaborators; `LocalSource` is the
/// real-disk implementation.
pub enum SourceEntry {
    File(Box<dyn FileEntry>),
    Directory(Box<dyn DirectoryEntry>),
    Symlink(Box<dyn SymlinkEntry>),
}

impl SourceEntry {
    pub fn metadata(&self) -> &EntryMetadata {
        match self {
            SourceEntry::File(f) => f.metadata(),
            SourceEntry::Directory(d) => d.metadata(),
            SourceEntry::Symlink(s) => s.metadata(),
        }
    }
}

pub trait FileEntry: Send + Sync {
    fn metadata(&self) -> &EntryMetadata;
    /// Open the file contents for streaming.
    fn open(&self) -> Result<Box<dyn Read + Send>>;
}

pub trait DirectoryEntry: Send + Sync {
    fn metadata(&self) -> &EntryMetadata;
    /// Children sorted by name.
    fn entries(&self) -> Result<Vec<SourceEntry>>;
}

pub trait SymlinkEntry: Send + Sync {
    fn metadata(&self) -> &EntryMetadata;
    fn read_link(&self) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Local filesystem source
// ---------------------------------------------------------------------------

/// Build a source entry for a path on the local filesystem.
pub fn local_source(path: impl AsRef<Path>) -> Result<SourceEntry> {
    let path = path.as_ref().to_path_buf();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    local_entry(path, name)
}

fn local_entry(path: PathBuf, name: String) -> Result<SourceEntry> {
    let metadata = fs::symlink_metadata(&path).map_err(|source| CairnError::ReadError {
        path: path.to_string_lossy().into_owned(),
        source,
    })?;
    let summary = summarize_metadata(&metadata);
    let file_type = metadata.file_type();

    let entry_type = if file_type.is_symlink() {
        EntryType::Symlink
    } else if file_type.is_dir() {
        EntryType::Directory
    } else if file_type.is_file() {
        EntryType::File
    } else {
        return Err(CairnError::Unsupported(format!(
            "{}: not a file, directory, or symlink",
            path.display()
        )));
    };

    let md = EntryMetadata {
        name,
        entry_type,
        mode: summary.mode,
        mtime_ns: summary.mtime_ns,
        uid: summary.uid,
        gid: summary.gid,
        size: summary.size,
    };

    Ok(match entry_type {
        EntryType::File => SourceEntry::File(Box::new(LocalFile { path, metadata: md })),
        EntryType::Directory => {
            SourceEntry::Directory(Box::new(LocalDirectory { path, metadata: md }))
        }
        EntryType::Symlink => SourceEntry::Symlink(Box::new(LocalSymlink { path, metadata: md })),
    })
}

struct LocalFile {
    path: PathBuf,
    metadata: EntryMetadata,
}

impl FileEntry for LocalFile {
    fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    fn open(&self) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(&self.path).map_err(|source| CairnError::ReadError {
            path: self.path.to_string_lossy().into_owned(),
            source,
        })?;
        Ok(Box::new(file))
    }
}

struct LocalDirectory {
    path: PathBuf,
    metadata: EntryMetadata,
}

impl DirectoryEntry for LocalDirectory {
    fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    fn entries(&self) -> Result<Vec<SourceEntry>> {
        let read_dir = fs::read_dir(&self.path).map_err(|source| CairnError::ReadError {
            path: self.path.to_string_lossy().into_owned(),
            source,
        })?;

        let mut children = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|source| CairnError::ReadError {
                path: self.path.to_string_lossy().into_owned(),
                source,
            })?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            children.push(local_entry(dir_entry.path(), name)?);
        }
        children.sort_by(|a, b| a.metadata().name.cmp(&b.metadata().name));
        Ok(children)
    }
}

struct LocalSymlink {
    path: PathBuf,
    metadata: EntryMetadata,
}

impl SymlinkEntry for LocalSymlink {
    fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    fn read_link(&self) -> Result<String> {
        let target = fs::read_link(&self.path).map_err(|source| CairnError::ReadError {
            path: self.path.to_string_lossy().into_owned(),
            source,
        })?;
        Ok(target.to_string_lossy().into_owned())
    }
}
