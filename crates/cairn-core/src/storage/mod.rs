pub mod local;
pub mod retry;

use std::sync::Arc;

pub use retry::{RetryPolicy, RetryingStore};

use crate::error::Result;

/// Well-known name of the format block.
pub const FORMAT_BLOB_NAME: &str = "F";
/// Prefix for pack blocks (`P<hex>`).
pub const PACK_BLOB_PREFIX: &str = "P";
/// Prefix for pack index blobs (`X<hex>`).
pub const INDEX_BLOB_PREFIX: &str = "X";
/// Prefix for legacy metadata blocks; recognized, never written.
pub const METADATA_BLOB_PREFIX: &str = "M";

/// Flat blob store addressed by opaque, prefixed names.
///
/// Operations fail with `BlockNotFound` for missing blobs, `Transient` for
/// retryable I/O, or `Fatal` when the store is permanently unavailable. The
/// engine absorbs `Transient` through [`RetryingStore`].
pub trait BlobStore: Send + Sync {
    /// Write a blob. Overwrites if it already exists.
    fn put_blob(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Read `length` bytes starting at `offset`; `length == 0` reads to the
    /// end of the blob.
    fn get_blob(&self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// List all blob names starting with `prefix`.
    fn list_blobs(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a blob. Deleting a missing blob is not an error.
    fn delete_blob(&self, name: &str) -> Result<()>;

    /// Size of a blob in bytes.
    fn blob_size(&self, name: &str) -> Result<u64>;
}

impl BlobStore for Arc<dyn BlobStore> {
    fn put_blob(&self, name: &str, data: &[u8]) -> Result<()> {
        (**self).put_blob(name, data)
    }
    fn get_blob(&self, name: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        (**self).get_blob(name, offset, length)
    }
    fn list_blobs(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_blobs(prefix)
    }
    fn delete_blob(&self, name: &str) -> Result<()> {
        (**self).delete_blob(name)
    }
    fn blob_size(&self, name: &str) -> Result<u64> {
        (**self).blob_size(name)
    }
}
