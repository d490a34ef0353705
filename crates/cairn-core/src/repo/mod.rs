pub mod format;
pub mod keys;

use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use tracing::debug;

use crate::block::BlockManager;
use crate::config::{MetadataEncryption, RepositoryOptions, DEFAULT_PACK_TARGET_SIZE};
use crate::error::{CairnError, Result};
use crate::hashing::{HashAlgorithm, Hasher};
use crate::object::ObjectManager;
use crate::storage::{BlobStore, RetryPolicy, RetryingStore, FORMAT_BLOB_NAME};

use self::format::{read_format_block, write_format_block, FormatBlock, FORMAT_VERSION};
use self::keys::{seal_secrets, unseal_secrets, RepositorySecrets};

/// A handle to an opened repository. Carries all mutable state; there is no
/// process-wide singleton.
pub struct Repository {
    storage: Arc<dyn BlobStore>,
    format: FormatBlock,
    blocks: Arc<BlockManager>,
    objects: ObjectManager,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Create a new repository in an empty store and open it.
    pub fn init(
        store: Box<dyn BlobStore>,
        options: &RepositoryOptions,
        password: Option<&str>,
    ) -> Result<Self> {
        options.validate()?;

        let storage: Arc<dyn BlobStore> =
            Arc::new(RetryingStore::new(Arc::from(store), RetryPolicy::default()));

        match storage.get_blob(FORMAT_BLOB_NAME, 0, 0) {
            Ok(_) => return Err(CairnError::RepoAlreadyExists),
            Err(CairnError::BlockNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let hmac_secret = match &options.object_hmac_secret {
            Some(secret) => secret.clone(),
            None if options.block_format == HashAlgorithm::Sha256 => Vec::new(),
            None => {
                let mut secret = vec![0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut secret);
                secret
            }
        };

        let mut block = FormatBlock {
            version: FORMAT_VERSION,
            chunker: options.splitter.as_str().to_string(),
            max_block_size: options.max_block_size,
            hasher: options.block_format.as_str().to_string(),
            hmac_key_salt: String::new(),
            sealed_secrets: None,
            metadata_encryption: options.metadata_encryption.as_str().to_string(),
            created_at: Utc::now(),
            checksum: String::new(),
        };

        match options.metadata_encryption {
            MetadataEncryption::None => {
                block.hmac_key_salt = hex::encode(&hmac_secret);
            }
            MetadataEncryption::Aes256Gcm => {
                let password = password.ok_or_else(|| {
                    CairnError::Config("master password required to seal repository secrets".into())
                })?;
                let secrets = RepositorySecrets {
                    hmac_secret: hmac_secret.clone(),
                };
                block.sealed_secrets = Some(seal_secrets(&secrets, password)?);
            }
        }

        write_format_block(&storage, &block)?;
        debug!(
            chunker = %block.chunker,
            hasher = %block.hasher,
            "initialized repository"
        );

        Self::assemble(storage, block, hmac_secret, options.pack_target_size)
    }

    /// Open an existing repository. The format block is read once; its
    /// parameters are immutable for the life of the handle.
    pub fn open(store: Box<dyn BlobStore>, password: Option<&str>) -> Result<Self> {
        Self::open_with_pack_target(store, password, DEFAULT_PACK_TARGET_SIZE)
    }

    /// Open with an explicit pack flush threshold.
    pub fn open_with_pack_target(
        store: Box<dyn BlobStore>,
        password: Option<&str>,
        pack_target_size: usize,
    ) -> Result<Self> {
        let storage: Arc<dyn BlobStore> =
            Arc::new(RetryingStore::new(Arc::from(store), RetryPolicy::default()));

        let block = read_format_block(&storage)?;

        let hmac_secret = match block.metadata_encryption()? {
            MetadataEncryption::None => hex::decode(&block.hmac_key_salt).map_err(|e| {
                CairnError::InvalidFormat(format!("invalid hmac_key_salt hex: {e}"))
            })?,
            MetadataEncryption::Aes256Gcm => {
                let sealed = block.sealed_secrets.as_ref().ok_or_else(|| {
                    CairnError::InvalidFormat("sealed secrets missing from format block".into())
                })?;
                let password = password.ok_or_else(|| {
                    CairnError::Config("master password required to open repository".into())
                })?;
                unseal_secrets(sealed, password)?.hmac_secret.clone()
            }
        };

        let repo = Self::assemble(storage, block, hmac_secret, pack_target_size)?;
        let blobs = repo.blocks.load_indexes()?;
        debug!(index_blobs = blobs, "opened repository");
        Ok(repo)
    }

    fn assemble(
        storage: Arc<dyn BlobStore>,
        block: FormatBlock,
        hmac_secret: Vec<u8>,
        pack_target_size: usize,
    ) -> Result<Self> {
        let algorithm = block.hash_algorithm()?;
        let splitter = block.splitter()?;
        splitter.validate_block_size(block.max_block_size)?;

        let hasher = Hasher::new(algorithm, &hmac_secret);
        let blocks = Arc::new(BlockManager::new(
            Arc::clone(&storage),
            hasher,
            pack_target_size,
        ));
        let objects = ObjectManager::new(Arc::clone(&blocks), splitter, block.max_block_size);

        Ok(Repository {
            storage,
            format: block,
            blocks,
            objects,
        })
    }

    /// The format block this repository was opened with.
    pub fn format(&self) -> &FormatBlock {
        &self.format
    }

    /// The object layer.
    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    /// The block layer.
    pub fn blocks(&self) -> &BlockManager {
        &self.blocks
    }

    /// The underlying (retry-wrapped) blob store.
    pub fn storage(&self) -> &Arc<dyn BlobStore> {
        &self.storage
    }

    /// Flush objects, then blocks — the ordering required before treating
    /// returned object IDs as durable.
    pub fn flush(&self) -> Result<()> {
        self.objects.flush()?;
        self.blocks.flush()
    }
}
