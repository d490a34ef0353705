use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::error::{CairnError, Result};
use crate::storage::BlobStore;

/// Blob store over a single local directory using `std::fs` directly.
/// Blob names map to flat file names under the root.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Reject blob names that could escape the store root.
    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CairnError::InvalidFormat("unsafe blob name: empty".into()));
        }
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(CairnError::InvalidFormat(format!(
                "unsafe blob name: '{name}'"
            )));
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        Self::validate_name(name)?;
        Ok(self.root.join(name))
    }
}

impl BlobStore for LocalStore {
    fn put_blob(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        fs::write(&path, data)?;
        Ok(())
    }

    fn get_blob(&self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CairnError::BlockNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        if length == 0 {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            return Ok(buf);
        }
        let mut buf = vec![0u8; length as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn list_blobs(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete_blob(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn blob_size(&self, name: &str) -> Result<u64> {
        let path = self.resolve(name)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CairnError::BlockNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_unsafe_names() {
        assert!(LocalStore::validate_name("").is_err());
        assert!(LocalStore::validate_name("a/b").is_err());
        assert!(LocalStore::validate_name("a\\b").is_err());
        assert!(LocalStore::validate_name("..").is_err());
        assert!(LocalStore::validate_name("P..deadbeef").is_err());
    }

    #[test]
    fn validate_name_accepts_safe_names() {
        assert!(LocalStore::validate_name("F").is_ok());
        assert!(LocalStore::validate_name("Pdeadbeef").is_ok());
        assert!(LocalStore::validate_name("Xdeadbeef").is_ok());
    }

    #[test]
    fn get_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let err = store.get_blob("Pmissing", 0, 0).unwrap_err();
        assert!(matches!(err, CairnError::BlockNotFound(_)));
    }

    #[test]
    fn put_get_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store.put_blob("Pabc", b"hello world").unwrap();
        assert_eq!(store.get_blob("Pabc", 0, 0).unwrap(), b"hello world");
        assert_eq!(store.get_blob("Pabc", 6, 5).unwrap(), b"world");
        assert_eq!(store.blob_size("Pabc").unwrap(), 11);
    }

    #[test]
    fn list_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store.put_blob("Pone", b"1").unwrap();
        store.put_blob("Ptwo", b"2").unwrap();
        store.put_blob("Xidx", b"3").unwrap();
        let packs = store.list_blobs("P").unwrap();
        assert_eq!(packs, vec!["Pone".to_string(), "Ptwo".to_string()]);
        assert_eq!(store.list_blobs("X").unwrap().len(), 1);
    }

    #[test]
    fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store.delete_blob("Pnope").unwrap();
    }
}
