use std::fmt;

use hmac::{Hmac, Mac};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CairnError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum width of a content hash in bytes (SHA-256 output).
pub const MAX_HASH_LEN: usize = 32;

/// A content hash of up to 32 bytes. Truncated formats keep a byte prefix
/// of the full digest, so the length is carried alongside the bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash {
    bytes: [u8; MAX_HASH_LEN],
    len: u8,
}

impl ContentHash {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() || data.len() > MAX_HASH_LEN {
            return Err(CairnError::MalformedData(format!(
                "content hash must be 1..={MAX_HASH_LEN} bytes, got {}",
                data.len()
            )));
        }
        let mut bytes = [0u8; MAX_HASH_LEN];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self {
            bytes,
            len: data.len() as u8,
        })
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s)
            .map_err(|e| CairnError::MalformedData(format!("invalid hash hex '{s}': {e}")))?;
        Self::from_bytes(&raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Width of this hash in bytes (16 for truncated formats, 32 otherwise).
    pub fn width(&self) -> usize {
        self.len as usize
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Content-hash algorithm fixed by the format block at repository creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// Plain SHA-256, no key.
    Sha256,
    /// HMAC-SHA-256 keyed with the repository secret, full 32 bytes.
    HmacSha256,
    /// HMAC-SHA-256 truncated to a 16-byte prefix.
    HmacSha256Half,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "UNENCRYPTED_SHA256",
            HashAlgorithm::HmacSha256 => "UNENCRYPTED_HMAC_SHA256",
            HashAlgorithm::HmacSha256Half => "UNENCRYPTED_HMAC_SHA256_128",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "UNENCRYPTED_SHA256" => Ok(HashAlgorithm::Sha256),
            "UNENCRYPTED_HMAC_SHA256" => Ok(HashAlgorithm::HmacSha256),
            "UNENCRYPTED_HMAC_SHA256_128" => Ok(HashAlgorithm::HmacSha256Half),
            other => Err(CairnError::InvalidFormat(format!(
                "unknown block format: '{other}'"
            ))),
        }
    }

    /// Width of the produced hash in bytes.
    pub fn hash_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::HmacSha256 => 32,
            HashAlgorithm::HmacSha256Half => 16,
        }
    }
}

/// Computes content hashes for chunks and pack blocks.
///
/// The algorithm and secret are fixed at repository creation; the secret may
/// be empty, which degenerates HMAC to a fixed-key MAC and is still a valid
/// (unkeyed) content address.
#[derive(Clone)]
pub struct Hasher {
    algorithm: HashAlgorithm,
    secret: Zeroizing<Vec<u8>>,
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm, secret: &[u8]) -> Self {
        Self {
            algorithm,
            secret: Zeroizing::new(secret.to_vec()),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let digest: [u8; 32] = match self.algorithm {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(data);
                hasher.finalize().into()
            }
            HashAlgorithm::HmacSha256 | HashAlgorithm::HmacSha256Half => {
                let mut mac = HmacSha256::new_from_slice(&self.secret)
                    .expect("HMAC accepts keys of any length");
                mac.update(data);
                mac.finalize().into_bytes().into()
            }
        };

        // Truncation is a byte prefix, never a rehash.
        let mut bytes = [0u8; MAX_HASH_LEN];
        let len = self.algorithm.hash_len();
        bytes[..len].copy_from_slice(&digest[..len]);
        ContentHash {
            bytes,
            len: len as u8,
        }
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
