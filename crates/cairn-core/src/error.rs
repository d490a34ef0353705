use thiserror::Error;

pub type Result<T> = std::result::Result<T, CairnError>;

#[derive(Debug, Error)]
pub enum CairnError {
    #[error("block not found: '{0}'")]
    BlockNotFound(String),

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("storage permanently unavailable: {0}")]
    Fatal(String),

    #[error("malformed data: {0}")]
    MalformedData(String),

    #[error("corrupt data: content hash mismatch for '{0}'")]
    CorruptData(String),

    #[error("cancelled")]
    Cancelled,

    #[error("read error for '{path}': {source}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported entry type: {0}")]
    Unsupported(String),

    #[error("invalid repository format: {0}")]
    InvalidFormat(String),

    #[error("repository already exists")]
    RepoAlreadyExists,

    #[error("invalid object ID: '{0}'")]
    InvalidObjectId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("decryption failed: wrong password or corrupted data")]
    DecryptionFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CairnError {
    /// Whether the store adapter may retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, CairnError::Transient(_))
    }
}
