use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CairnError, Result};

/// Secret material derived or unsealed at open time.
/// Zeroized on drop so key bytes don't linger in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RepositorySecrets {
    pub hmac_secret: Vec<u8>,
}

impl std::fmt::Debug for RepositorySecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySecrets").finish_non_exhaustive()
    }
}

/// Serialized payload inside the sealed-secrets ciphertext.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SecretsPayload {
    hmac_secret: Vec<u8>,
}

/// KDF parameters stored alongside the sealed secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
    /// Hex-encoded salt.
    pub salt: String,
}

/// Password-sealed repository secrets as stored in the format block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedSecrets {
    pub kdf: KdfParams,
    /// Hex-encoded 12-byte nonce.
    pub nonce: String,
    /// Hex-encoded AES-256-GCM ciphertext.
    pub ciphertext: String,
}

// KDF parameter bounds to reject maliciously crafted format blocks.
const MAX_TIME_COST: u32 = 10;
const MAX_PARALLELISM: u32 = 16;
const MAX_MEMORY_KIB: u32 = 524_288; // 512 MiB
const MIN_SALT_LEN: usize = 16;
const MAX_SALT_LEN: usize = 64;

fn validate_kdf_params(kdf: &KdfParams, salt: &[u8]) -> Result<()> {
    if kdf.algorithm != "argon2id" {
        return Err(CairnError::DecryptionFailed);
    }
    if kdf.time_cost == 0 || kdf.time_cost > MAX_TIME_COST {
        return Err(CairnError::DecryptionFailed);
    }
    if kdf.parallelism == 0 || kdf.parallelism > MAX_PARALLELISM {
        return Err(CairnError::DecryptionFailed);
    }
    if kdf.memory_cost == 0 || kdf.memory_cost > MAX_MEMORY_KIB {
        return Err(CairnError::DecryptionFailed);
    }
    if salt.len() < MIN_SALT_LEN || salt.len() > MAX_SALT_LEN {
        return Err(CairnError::DecryptionFailed);
    }
    Ok(())
}

/// Stable AAD bytes binding KDF parameters to the ciphertext, preventing
/// parameter substitution on the format block.
fn kdf_params_aad(kdf: &KdfParams, salt: &[u8]) -> Vec<u8> {
    let prefix = b"cairn:kdf-aad:v1\0";
    let algo_bytes = kdf.algorithm.as_bytes();
    let mut buf =
        Vec::with_capacity(prefix.len() + 4 + algo_bytes.len() + 4 + 4 + 4 + 4 + salt.len());
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(&(algo_bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(algo_bytes);
    buf.extend_from_slice(&kdf.time_cost.to_le_bytes());
    buf.extend_from_slice(&kdf.memory_cost.to_le_bytes());
    buf.extend_from_slice(&kdf.parallelism.to_le_bytes());
    buf.extend_from_slice(&(salt.len() as u32).to_le_bytes());
    buf.extend_from_slice(salt);
    buf
}

/// Derive a 32-byte wrapping key from the master password using Argon2id.
fn derive_wrapping_key(password: &str, kdf: &KdfParams, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| CairnError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, output.as_mut())
        .map_err(|e| CairnError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}

/// Seal repository secrets under the master password with Argon2id + AES-256-GCM.
pub fn seal_secrets(secrets: &RepositorySecrets, password: &str) -> Result<SealedSecrets> {
    let mut salt = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let kdf = KdfParams {
        algorithm: "argon2id".to_string(),
        time_cost: 3,
        memory_cost: 65536, // 64 MiB
        parallelism: 4,
        salt: hex::encode(&salt),
    };
    let wrapping_key = derive_wrapping_key(password, &kdf, &salt)?;

    let payload = SecretsPayload {
        hmac_secret: secrets.hmac_secret.clone(),
    };
    let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);

    let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
        .map_err(|e| CairnError::KeyDerivation(format!("cipher init: {e}")))?;
    let mut nonce_bytes = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let aad = kdf_params_aad(&kdf, &salt);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext.as_ref(),
                aad: &aad,
            },
        )
        .map_err(|e| CairnError::KeyDerivation(format!("encrypt: {e}")))?;

    Ok(SealedSecrets {
        kdf,
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Unseal repository secrets with the master password.
pub fn unseal_secrets(sealed: &SealedSecrets, password: &str) -> Result<RepositorySecrets> {
    let salt = hex::decode(&sealed.kdf.salt).map_err(|_| CairnError::DecryptionFailed)?;
    validate_kdf_params(&sealed.kdf, &salt)?;

    let nonce_bytes = hex::decode(&sealed.nonce).map_err(|_| CairnError::DecryptionFailed)?;
    if nonce_bytes.len() != 12 {
        return Err(CairnError::DecryptionFailed);
    }
    let ciphertext = hex::decode(&sealed.ciphertext).map_err(|_| CairnError::DecryptionFailed)?;

    let wrapping_key = derive_wrapping_key(password, &sealed.kdf, &salt)?;
    let cipher =
        Aes256Gcm::new_from_slice(wrapping_key.as_ref()).map_err(|_| CairnError::DecryptionFailed)?;
    let aad = kdf_params_aad(&sealed.kdf, &salt);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: ciphertext.as_ref(),
                aad: &aad,
            },
        )
        .map_err(|_| CairnError::DecryptionFailed)?;
    let plaintext = Zeroizing::new(plaintext);

    let payload: SecretsPayload =
        serde_json::from_slice(&plaintext).map_err(|_| CairnError::DecryptionFailed)?;

    Ok(RepositorySecrets {
        hmac_secret: payload.hmac_secret.clone(),
    })
}
