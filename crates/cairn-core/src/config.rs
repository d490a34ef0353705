use crate::chunker::SplitterKind;
use crate::error::{CairnError, Result};
use crate::hashing::HashAlgorithm;

/// Default upper bound on chunk length: 4 MiB.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Default pack flush threshold: 20 MB.
pub const DEFAULT_PACK_TARGET_SIZE: usize = 20_000_000;

/// Metadata sealing for repository secrets in the format block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataEncryption {
    None,
    Aes256Gcm,
}

impl MetadataEncryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataEncryption::None => "NONE",
            MetadataEncryption::Aes256Gcm => "AES256_GCM",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "NONE" => Ok(MetadataEncryption::None),
            "AES256_GCM" => Ok(MetadataEncryption::Aes256Gcm),
            other => Err(CairnError::InvalidFormat(format!(
                "unknown metadata encryption algorithm: '{other}'"
            ))),
        }
    }
}

/// Options recognized at repository creation; persisted in the format block
/// and immutable thereafter.
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Upper bound on chunk length.
    pub max_block_size: usize,
    /// Chunk boundary selection.
    pub splitter: SplitterKind,
    /// Content-hash algorithm for chunks and packs.
    pub block_format: HashAlgorithm,
    /// Raw bytes keying the HMAC. `None` generates a random 32-byte secret
    /// at init; `Some(vec![])` explicitly selects an empty key.
    pub object_hmac_secret: Option<Vec<u8>>,
    /// Sealing of repository secrets under the master password.
    pub metadata_encryption: MetadataEncryption,
    /// Pack flush threshold in bytes.
    pub pack_target_size: usize,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            splitter: SplitterKind::Rolling,
            block_format: HashAlgorithm::HmacSha256,
            object_hmac_secret: None,
            metadata_encryption: MetadataEncryption::None,
            pack_target_size: DEFAULT_PACK_TARGET_SIZE,
        }
    }
}

impl RepositoryOptions {
    pub fn validate(&self) -> Result<()> {
        self.splitter.validate_block_size(self.max_block_size)?;
        if self.pack_target_size == 0 {
            return Err(CairnError::Config("pack_target_size must be > 0".into()));
        }
        if self.block_format == HashAlgorithm::Sha256
            && self.object_hmac_secret.as_ref().is_some_and(|s| !s.is_empty())
        {
            return Err(CairnError::Config(
                "object_hmac_secret has no effect with UNENCRYPTED_SHA256".into(),
            ));
        }
        Ok(())
    }
}

/// Options for pack index compaction.
#[derive(Debug, Clone, Copy)]
pub struct CompactOptions {
    /// Do nothing when fewer than this many live index blobs exist.
    pub min_small_blocks: usize,
    /// Merge at most this many of the smallest index blobs per run.
    pub max_small_blocks: usize,
}
