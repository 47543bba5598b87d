//! Encrypted at-rest key files
//!
//! Each signing key is persisted as `<keyid>.json` in the keystore
//! directory: the Ed25519 secret encrypted with AES-256-GCM under a key
//! derived from the role password via scrypt. The scrypt parameters and
//! salt are stored alongside the ciphertext so loading needs only the
//! password.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::{key_id_for, KeyId, Keystore};

/// Schema identifier for encrypted key files
pub const KEY_FILE_SCHEMA_ID: &str = "tuf-delegate/encrypted_key@1";

/// Length of the scrypt salt in bytes
const SALT_LEN: usize = 16;

/// Length of the AES-GCM nonce in bytes
const NONCE_LEN: usize = 12;

/// Length of the derived encryption key in bytes (AES-256)
const DERIVED_KEY_LEN: usize = 32;

/// Errors from key generation and loading
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no key file for key {key_id} in {dir}")]
    MissingKeyFile { key_id: KeyId, dir: String },

    #[error("cannot decrypt key {key_id}: wrong password or corrupt key file")]
    WrongPassword { key_id: KeyId },

    #[error("key file {path} holds key {actual}, expected {expected}")]
    KeyIdMismatch {
        path: String,
        expected: KeyId,
        actual: KeyId,
    },

    #[error("{count} key(s) but {passwords} password(s) for this role")]
    PasswordCountMismatch { count: usize, passwords: usize },

    #[error("invalid scrypt parameters: {0}")]
    KdfParams(String),

    #[error("base64 decode error in key file: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("AEAD failure: {0}")]
    Aead(String),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

/// Scrypt work factor (log2 of the CPU/memory cost)
///
/// The r and p parameters are fixed at the RFC 7914 recommended 8 and 1;
/// only the cost exponent is configurable. Tests use a deliberately weak
/// factor to keep derivation fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScryptWorkFactor(pub u8);

impl ScryptWorkFactor {
    /// Production default, matching the interactive-login cost class
    pub const DEFAULT: Self = Self(15);

    /// Weak factor for tests
    pub const WEAK: Self = Self(8);
}

impl Default for ScryptWorkFactor {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Scrypt parameters stored in the key file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdfParams {
    /// Base64 random salt
    salt: String,

    /// log2 of the scrypt cost
    log_n: u8,

    r: u32,
    p: u32,
}

/// On-disk encrypted key file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedKeyFile {
    /// Schema identifier
    schema_id: String,

    /// Key ID (hex SHA-256 of the public key)
    keyid: KeyId,

    /// Key type, always "ed25519"
    keytype: String,

    /// Base64 public key bytes
    public_key: String,

    /// Scrypt parameters for the password-derived encryption key
    kdf: KdfParams,

    /// Base64 AES-GCM nonce
    nonce: String,

    /// Base64 AES-256-GCM ciphertext of the 32-byte secret key
    ciphertext: String,
}

/// A newly generated, persisted key
#[derive(Debug, Clone)]
pub struct KeyRecord {
    /// Key ID of the generated key
    pub key_id: KeyId,

    /// Location of the encrypted key file
    pub path: PathBuf,
}

fn b64_encode(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

fn b64_decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
}

fn derive_key(password: &str, params: &KdfParams) -> Result<[u8; DERIVED_KEY_LEN], KeyError> {
    let salt = b64_decode(&params.salt)?;
    let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, DERIVED_KEY_LEN)
        .map_err(|e| KeyError::KdfParams(e.to_string()))?;
    let mut derived = [0u8; DERIVED_KEY_LEN];
    scrypt::scrypt(password.as_bytes(), &salt, &scrypt_params, &mut derived)
        .map_err(|e| KeyError::KdfParams(e.to_string()))?;
    Ok(derived)
}

fn key_file_path(keystore_dir: &Path, key_id: &str) -> PathBuf {
    keystore_dir.join(format!("{key_id}.json"))
}

/// Generate a new Ed25519 key and persist it encrypted under `password`
pub fn generate_and_save_key(
    keystore_dir: &Path,
    password: &str,
    work_factor: ScryptWorkFactor,
) -> Result<KeyRecord, KeyError> {
    let signing_key = SigningKey::generate(&mut rand::thread_rng());
    let key_id = key_id_for(&signing_key.verifying_key());

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let kdf = KdfParams {
        salt: b64_encode(&salt),
        log_n: work_factor.0,
        r: 8,
        p: 1,
    };

    let derived = derive_key(password, &kdf)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), signing_key.to_bytes().as_slice())
        .map_err(|e| KeyError::Aead(e.to_string()))?;

    let key_file = EncryptedKeyFile {
        schema_id: KEY_FILE_SCHEMA_ID.to_string(),
        keyid: key_id.clone(),
        keytype: "ed25519".to_string(),
        public_key: b64_encode(signing_key.verifying_key().as_bytes()),
        kdf,
        nonce: b64_encode(&nonce),
        ciphertext: b64_encode(&ciphertext),
    };

    let path = key_file_path(keystore_dir, &key_id);
    fs::write(&path, serde_json::to_string_pretty(&key_file)?)?;

    Ok(KeyRecord { key_id, path })
}

/// Decrypt one key file with `password`
fn load_one(keystore_dir: &Path, key_id: &str, password: &str) -> Result<SigningKey, KeyError> {
    let path = key_file_path(keystore_dir, key_id);
    let json = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            KeyError::MissingKeyFile {
                key_id: key_id.to_string(),
                dir: keystore_dir.display().to_string(),
            }
        } else {
            KeyError::Io(e)
        }
    })?;
    let key_file: EncryptedKeyFile = serde_json::from_str(&json)?;

    let derived = derive_key(password, &key_file.kdf)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
    let nonce = b64_decode(&key_file.nonce)?;
    if nonce.len() != NONCE_LEN {
        return Err(KeyError::Aead(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), b64_decode(&key_file.ciphertext)?.as_slice())
        .map_err(|_| KeyError::WrongPassword {
            key_id: key_id.to_string(),
        })?;

    let secret: [u8; 32] = plaintext
        .try_into()
        .map_err(|_| KeyError::InvalidKeyMaterial("secret key must be 32 bytes".to_string()))?;
    let signing_key = SigningKey::from_bytes(&secret);

    let actual = key_id_for(&signing_key.verifying_key());
    if actual != key_id {
        return Err(KeyError::KeyIdMismatch {
            path: path.display().to_string(),
            expected: key_id.to_string(),
            actual,
        });
    }

    Ok(signing_key)
}

/// Decrypt `key_ids` with their paired `passwords` into the keystore
///
/// Key IDs and passwords are parallel, order-significant lists. Returns
/// the IDs actually loaded.
pub fn load_keys(
    keystore_dir: &Path,
    keystore: &mut Keystore,
    key_ids: &[KeyId],
    passwords: &[String],
) -> Result<Vec<KeyId>, KeyError> {
    if key_ids.len() != passwords.len() {
        return Err(KeyError::PasswordCountMismatch {
            count: key_ids.len(),
            passwords: passwords.len(),
        });
    }

    let mut loaded = Vec::with_capacity(key_ids.len());
    for (key_id, password) in key_ids.iter().zip(passwords) {
        let signing_key = load_one(keystore_dir, key_id, password)?;
        loaded.push(keystore.insert(signing_key));
    }
    Ok(loaded)
}
