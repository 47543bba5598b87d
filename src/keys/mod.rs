//! Signing keys and the in-process keystore
//!
//! Keys are Ed25519. A key's identifier is the lowercase-hex SHA-256
//! fingerprint of its public key bytes. Encrypted at-rest storage lives in
//! [`storage`]; decrypted keys are held in a [`Keystore`] owned by the
//! caller for the lifetime of the operation (there is no unload step).

pub mod storage;

use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub use storage::{generate_and_save_key, load_keys, KeyError, KeyRecord, ScryptWorkFactor};

/// Hex SHA-256 fingerprint of an Ed25519 public key
pub type KeyId = String;

/// Compute the key ID for a public key
pub fn key_id_for(key: &VerifyingKey) -> KeyId {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Decrypted signing keys, indexed by key ID
///
/// Mutable shared state of the delegation flow: every provisioning call
/// may insert into it. Not synchronized; callers serialize access.
#[derive(Debug, Default)]
pub struct Keystore {
    keys: BTreeMap<KeyId, SigningKey>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a decrypted key, returning its ID
    pub fn insert(&mut self, key: SigningKey) -> KeyId {
        let key_id = key_id_for(&key.verifying_key());
        self.keys.insert(key_id.clone(), key);
        key_id
    }

    pub fn get(&self, key_id: &str) -> Option<&SigningKey> {
        self.keys.get(key_id)
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    /// IDs of all loaded keys, in sorted order
    pub fn key_ids(&self) -> impl Iterator<Item = &KeyId> {
        self.keys.keys()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
