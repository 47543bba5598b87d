//! Signed targets metadata
//!
//! The on-disk document format: a `signed` targets body (version,
//! expiration, target-file descriptors, delegations) wrapped with the
//! signatures of the owning role's keys. Signatures are Ed25519 over the
//! JCS (RFC 8785) canonicalization of the body, stored base64.

pub mod check;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::Signer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

use crate::keys::{KeyId, Keystore};
use crate::role::{PathConstraint, RoleName, METADATA_EXTENSION};

/// Value of the `_type` field in targets metadata
pub const TARGETS_METADATA_TYPE: &str = "targets";

/// Errors from metadata construction, signing and parsing
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot parse metadata file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("key {0} is not loaded in the keystore")]
    KeyNotLoaded(KeyId),

    #[error("target file {0} does not exist under the repository root")]
    MissingTargetFile(String),

    #[error("error walking metadata directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Size and content hashes of one target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// File size in bytes
    pub length: u64,

    /// Hash algorithm name to lowercase-hex digest
    pub hashes: BTreeMap<String, String>,
}

impl TargetDescriptor {
    /// Hash a file on disk into a descriptor
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let contents = fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&contents);
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hex::encode(hasher.finalize()));
        Ok(Self {
            length: contents.len() as u64,
            hashes,
        })
    }
}

/// Public key record inside a delegations block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    /// Key type, always "ed25519"
    pub keytype: String,

    /// Base64 public key bytes
    pub public: String,
}

/// One delegation from a role to a named child role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationEntry {
    /// Delegatee's name local to the delegator
    pub name: String,

    /// Key IDs authorized to sign the delegatee's metadata
    pub keyids: Vec<KeyId>,

    /// Repository-relative paths the delegatee is responsible for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,

    /// Hex prefix over hashed target paths, the alternative to `paths`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_hash_prefix: Option<String>,
}

impl DelegationEntry {
    /// Build an entry from a path constraint
    pub fn new(name: &str, keyids: Vec<KeyId>, constraint: &PathConstraint) -> Self {
        let (paths, path_hash_prefix) = match constraint {
            PathConstraint::Paths(paths) => (Some(paths.clone()), None),
            PathConstraint::HashPrefix(prefix) => (None, Some(prefix.clone())),
        };
        Self {
            name: name.to_string(),
            keyids,
            paths,
            path_hash_prefix,
        }
    }
}

/// Delegations block of a targets body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegations {
    /// Public keys of all delegatees, by key ID
    pub keys: BTreeMap<KeyId, PublicKeyRecord>,

    /// Delegation entries, in insertion order
    pub roles: Vec<DelegationEntry>,
}

impl Delegations {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.roles.is_empty()
    }
}

/// Unsigned targets metadata body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsMetadata {
    /// Document type, always "targets"
    #[serde(rename = "_type")]
    pub metadata_type: String,

    /// Version number (fixed at 1 on every write)
    pub version: u32,

    /// Expiration timestamp
    pub expires: DateTime<Utc>,

    /// Repository-relative path to descriptor
    pub targets: BTreeMap<String, TargetDescriptor>,

    /// Delegations to child roles
    #[serde(default, skip_serializing_if = "Delegations::is_empty")]
    pub delegations: Delegations,
}

impl TargetsMetadata {
    /// Empty body with no targets and no delegations
    pub fn empty(version: u32, expires: DateTime<Utc>) -> Self {
        Self {
            metadata_type: TARGETS_METADATA_TYPE.to_string(),
            version,
            expires,
            targets: BTreeMap::new(),
            delegations: Delegations::default(),
        }
    }
}

/// A single signature over the canonicalized body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSignature {
    /// ID of the signing key
    pub keyid: KeyId,

    /// Base64 Ed25519 signature
    pub sig: String,
}

/// Signed wrapper persisted to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMetadata {
    pub signed: TargetsMetadata,
    pub signatures: Vec<MetadataSignature>,
}

impl SignedMetadata {
    /// Load a signed document from a metadata file
    pub fn from_file(path: &Path) -> Result<Self, MetadataError> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|source| MetadataError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Build a targets body describing `relative_paths`
///
/// Each relative path (`targets/...`) is resolved against the repository
/// root, hashed and measured.
pub fn generate_targets_metadata(
    repository_dir: &Path,
    relative_paths: &[String],
    version: u32,
    expires: DateTime<Utc>,
) -> Result<TargetsMetadata, MetadataError> {
    let mut targets = BTreeMap::new();
    for relative in relative_paths {
        let absolute = repository_dir.join(relative);
        if !absolute.is_file() {
            return Err(MetadataError::MissingTargetFile(relative.clone()));
        }
        targets.insert(relative.clone(), TargetDescriptor::from_file(&absolute)?);
    }

    let mut metadata = TargetsMetadata::empty(version, expires);
    metadata.targets = targets;
    Ok(metadata)
}

/// Sign a body with keys already loaded in the keystore
pub fn sign_metadata(
    metadata: TargetsMetadata,
    key_ids: &[KeyId],
    keystore: &Keystore,
) -> Result<SignedMetadata, MetadataError> {
    let canonical = serde_json_canonicalizer::to_vec(&metadata)
        .map_err(|e| MetadataError::Canonicalization(e.to_string()))?;

    let mut signatures = Vec::with_capacity(key_ids.len());
    for key_id in key_ids {
        let signing_key = keystore
            .get(key_id)
            .ok_or_else(|| MetadataError::KeyNotLoaded(key_id.clone()))?;
        let signature = signing_key.sign(&canonical);
        signatures.push(MetadataSignature {
            keyid: key_id.clone(),
            sig: base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
        });
    }

    Ok(SignedMetadata {
        signed: metadata,
        signatures,
    })
}

/// Sign a body and persist it at `destination`
///
/// Intermediate directories are created; the document is written to a
/// temporary file in the destination directory and renamed into place.
pub fn sign_and_write(
    metadata: TargetsMetadata,
    key_ids: &[KeyId],
    keystore: &Keystore,
    destination: &Path,
) -> Result<(), MetadataError> {
    let signed = sign_metadata(metadata, key_ids, keystore)?;
    let json = serde_json::to_string_pretty(&signed)?;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = destination.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, destination)?;
    Ok(())
}

/// Add or overwrite a delegation entry in the delegator's metadata
///
/// The delegator's existing body is kept (targets, version, expiration);
/// only the delegations block changes. A delegator with no metadata file
/// yet starts from an empty version-1 body expiring at `default_expires`.
/// Public keys no longer referenced by any entry are pruned. The result
/// is re-signed with the delegator's keys and written back.
#[allow(clippy::too_many_arguments)]
pub fn update_parent_delegation(
    metadata_dir: &Path,
    delegatee_local_name: &str,
    delegatee_key_ids: &[KeyId],
    delegator: &RoleName,
    delegator_key_ids: &[KeyId],
    constraint: &PathConstraint,
    keystore: &Keystore,
    default_expires: DateTime<Utc>,
) -> Result<(), MetadataError> {
    let destination = delegator.metadata_path(metadata_dir);

    let mut metadata = if destination.is_file() {
        SignedMetadata::from_file(&destination)?.signed
    } else {
        TargetsMetadata::empty(1, default_expires)
    };

    let entry = DelegationEntry::new(delegatee_local_name, delegatee_key_ids.to_vec(), constraint);
    let roles = &mut metadata.delegations.roles;
    match roles.iter_mut().find(|r| r.name == delegatee_local_name) {
        Some(existing) => *existing = entry,
        None => roles.push(entry),
    }

    for key_id in delegatee_key_ids {
        let signing_key = keystore
            .get(key_id)
            .ok_or_else(|| MetadataError::KeyNotLoaded(key_id.clone()))?;
        metadata.delegations.keys.insert(
            key_id.clone(),
            PublicKeyRecord {
                keytype: "ed25519".to_string(),
                public: base64::engine::general_purpose::STANDARD
                    .encode(signing_key.verifying_key().as_bytes()),
            },
        );
    }

    let referenced: Vec<KeyId> = metadata
        .delegations
        .roles
        .iter()
        .flat_map(|r| r.keyids.iter().cloned())
        .collect();
    metadata
        .delegations
        .keys
        .retain(|key_id, _| referenced.contains(key_id));

    sign_and_write(metadata, delegator_key_ids, keystore, &destination)
}

/// Key IDs of every role recorded in the metadata tree
///
/// A role's own metadata registers the key IDs of its signatures; a
/// parent's delegation entry registers the child role and is
/// authoritative for it. Files that do not map to a `targets` role name
/// (e.g. `root.json`) are ignored.
pub fn known_roles(metadata_dir: &Path) -> Result<BTreeMap<String, Vec<KeyId>>, MetadataError> {
    let mut own_keys: BTreeMap<String, Vec<KeyId>> = BTreeMap::new();
    let mut delegated_keys: BTreeMap<String, Vec<KeyId>> = BTreeMap::new();

    if !metadata_dir.is_dir() {
        return Ok(BTreeMap::new());
    }

    for entry in WalkDir::new(metadata_dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(METADATA_EXTENSION) {
            continue;
        }

        let Some(role_name) = role_name_for_metadata_path(metadata_dir, path) else {
            continue;
        };

        let signed = SignedMetadata::from_file(path)?;
        own_keys.insert(
            role_name.as_str().to_string(),
            signed.signatures.iter().map(|s| s.keyid.clone()).collect(),
        );
        for delegation in &signed.signed.delegations.roles {
            let child = format!("{}/{}", role_name, delegation.name);
            delegated_keys.insert(child, delegation.keyids.clone());
        }
    }

    own_keys.extend(delegated_keys);
    Ok(own_keys)
}

/// Invert the role-to-file mapping: `metadata/targets/a/b.json` -> `targets/a/b`
fn role_name_for_metadata_path(metadata_dir: &Path, path: &Path) -> Option<RoleName> {
    let relative = path.strip_prefix(metadata_dir).ok()?;
    let name = relative.with_extension("");
    RoleName::new(name.to_str()?).ok()
}
