use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunker::SplitterKind;
use crate::config::MetadataEncryption;
use crate::error::{CairnError, Result};
use crate::hashing::HashAlgorithm;
use crate::repo::keys::SealedSecrets;
use crate::storage::{BlobStore, FORMAT_BLOB_NAME};

/// Current format block version.
pub const FORMAT_VERSION: u32 = 1;

/// The single well-known blob describing chunker, hasher, and key material.
///
/// Written once at repository creation under [`FORMAT_BLOB_NAME`]; read once
/// at open time and immutable thereafter. The `checksum` field authenticates
/// the block against accidental truncation or partial overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatBlock {
    pub version: u32,
    pub chunker: String,
    pub max_block_size: usize,
    pub hasher: String,
    /// Hex-encoded HMAC secret when metadata encryption is NONE.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hmac_key_salt: String,
    /// Password-sealed secrets when metadata encryption is an AEAD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_secrets: Option<SealedSecrets>,
    pub metadata_encryption: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub checksum: String,
}

impl FormatBlock {
    pub fn splitter(&self) -> Result<SplitterKind> {
        SplitterKind::parse(&self.chunker)
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm> {
        HashAlgorithm::parse(&self.hasher)
    }

    pub fn metadata_encryption(&self) -> Result<MetadataEncryption> {
        MetadataEncryption::parse(&self.metadata_encryption)
    }

    /// Serialize with the repository-scoped checksum filled in.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut block = self.clone();
        block.checksum = String::new();
        block.checksum = Self::compute_checksum(&block)?;
        Ok(serde_json::to_vec_pretty(&block)?)
    }

    /// Parse and verify a format block read from storage.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let block: FormatBlock = serde_json::from_slice(data)
            .map_err(|e| CairnError::InvalidFormat(format!("unparseable format block: {e}")))?;

        if block.version != FORMAT_VERSION {
            return Err(CairnError::InvalidFormat(format!(
                "unsupported format version: {}",
                block.version
            )));
        }

        let mut unchecked = block.clone();
        unchecked.checksum = String::new();
        if Self::compute_checksum(&unchecked)? != block.checksum {
            return Err(CairnError::InvalidFormat(
                "format block checksum mismatch".into(),
            ));
        }

        Ok(block)
    }

    fn compute_checksum(block: &FormatBlock) -> Result<String> {
        let body = serde_json::to_vec(block)?;
        let mut hasher = Sha256::new();
        hasher.update(&body);
        Ok(hex::encode(hasher.finalize()))
    }
}

pub fn write_format_block(store: &dyn BlobStore, block: &FormatBlock) -> Result<()> {
    store.put_blob(FORMAT_BLOB_NAME, &block.to_bytes()?)
}

pub fn read_format_block(store: &dyn BlobStore) -> Result<FormatBlock> {
    let data = store
        .get_blob(FORMAT_BLOB_NAME, 0, 0)
        .map_err(|e| match e {
            CairnError::BlockNotFound(_) => {
                CairnError::InvalidFormat("repository format block not found".into())
            }
            other => other,
        })?;
    FormatBlock::from_bytes(&data)
}
