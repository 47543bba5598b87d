//! Delegation decision and construction
//!
//! The orchestration layer: decide whether a role's metadata is stale,
//! provision (reuse or generate) that role's signing keys, record the
//! delegation in the delegator's signed metadata, and write a role's own
//! targets metadata. All state flows through explicit handles: the
//! validated [`RepositoryContext`] and a caller-owned [`Keystore`].

use chrono::{Duration, Utc};
use std::path::Path;
use thiserror::Error;

use crate::config::{ConfigError, RepositoryContext};
use crate::keys::{generate_and_save_key, load_keys, KeyError, KeyId, Keystore};
use crate::metadata::check::{metadata_matches_data, CheckError};
use crate::metadata::{
    generate_targets_metadata, known_roles, sign_and_write, update_parent_delegation,
    MetadataError,
};
use crate::role::{PathConstraint, RoleError, RoleName};
use crate::targets::{FilePredicate, PathLayoutError, WalkOptions};

/// Version written into every metadata document.
///
/// TODO: derive the version from a verified copy of the extant metadata
/// instead of pinning 1.
const METADATA_VERSION: u32 = 1;

/// Errors from the delegation flow
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Path(#[from] PathLayoutError),

    /// Loaded keys differ from the keys provisioning asked for. This
    /// signals keystore corruption or a password misconfiguration and is
    /// never recoverable here.
    #[error("provisioning for role {role} loaded keys {loaded:?}, expected {requested:?}")]
    KeyProvisioningInvariant {
        role: RoleName,
        requested: Vec<KeyId>,
        loaded: Vec<KeyId>,
    },
}

/// Provision signing keys for a role
///
/// Reuses the key IDs the metadata tree already records for the role;
/// otherwise generates one new encrypted key per configured password, in
/// password order. Either way the keys are decrypted into `keystore` and
/// the loaded set must equal the requested set.
pub fn provision_role_keys(
    context: &RepositoryContext,
    keystore: &mut Keystore,
    role: &RoleName,
) -> Result<Vec<KeyId>, DelegationError> {
    let passwords = context.config().passwords_for(role)?;
    let roles = known_roles(context.metadata_dir())?;

    // NOTE: keys generated here but never associated with the role in
    // metadata (e.g. a later step fails) are reused by nobody; a cleanup
    // tool for orphaned key files would have to find them.
    let key_ids = match roles.get(role.as_str()) {
        Some(key_ids) => key_ids.clone(),
        None => {
            let mut generated = Vec::with_capacity(passwords.len());
            for password in passwords {
                let record = generate_and_save_key(
                    context.keystore_dir(),
                    password,
                    context.config().work_factor,
                )?;
                generated.push(record.key_id);
            }
            generated
        }
    };

    let loaded = load_keys(context.keystore_dir(), keystore, &key_ids, passwords)?;
    if loaded != key_ids {
        return Err(DelegationError::KeyProvisioningInvariant {
            role: role.clone(),
            requested: key_ids,
            loaded,
        });
    }

    Ok(key_ids)
}

/// Whether a role's metadata is stale relative to the files on disk
///
/// A role with no metadata file at all needs delegation; any other
/// comparator failure propagates.
pub fn needs_delegation(
    context: &RepositoryContext,
    role: &RoleName,
    files_dir: &Path,
    options: &WalkOptions,
    predicate: &FilePredicate,
) -> Result<bool, DelegationError> {
    match metadata_matches_data(
        context.metadata_dir(),
        context.targets_dir(),
        role,
        files_dir,
        options,
        predicate,
    ) {
        Ok(matched) => Ok(!matched),
        Err(CheckError::MissingRoleMetadata(_)) => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Record a delegation in the delegator's signed metadata
///
/// Adds or overwrites the entry for the delegatee's local name, then
/// re-signs and rewrites the delegator's metadata unconditionally; no
/// staleness comparison is made against the existing entry.
pub fn update_delegator_metadata(
    context: &RepositoryContext,
    keystore: &Keystore,
    delegator: &RoleName,
    delegatee_local_name: &str,
    delegator_key_ids: &[KeyId],
    delegatee_key_ids: &[KeyId],
    constraint: &PathConstraint,
) -> Result<(), DelegationError> {
    update_parent_delegation(
        context.metadata_dir(),
        delegatee_local_name,
        delegatee_key_ids,
        delegator,
        delegator_key_ids,
        constraint,
        keystore,
        Utc::now() + context.validity(),
    )?;
    Ok(())
}

/// Create or refresh a delegation from `delegator` to `delegatee`
///
/// Provisions both roles' keys and records the delegation under the
/// delegatee's local name. Writing the delegatee's own targets metadata
/// is a separate, explicit [`write_targets_metadata`] call.
pub fn make_delegation(
    context: &RepositoryContext,
    keystore: &mut Keystore,
    delegator: &RoleName,
    delegatee: &RoleName,
    constraint: &PathConstraint,
) -> Result<(), DelegationError> {
    let local_name = delegator.delegatee_local_name(delegatee)?.to_string();

    let delegator_key_ids = provision_role_keys(context, keystore, delegator)?;
    let delegatee_key_ids = provision_role_keys(context, keystore, delegatee)?;

    update_delegator_metadata(
        context,
        keystore,
        delegator,
        &local_name,
        &delegator_key_ids,
        &delegatee_key_ids,
        constraint,
    )
}

/// Build, sign and write a role's own targets metadata
///
/// The metadata file lands at the location mirroring the role hierarchy;
/// the first delegation under a parent creates the parent's directory.
/// Expiration is now plus `validity`.
pub fn write_targets_metadata(
    context: &RepositoryContext,
    keystore: &Keystore,
    role: &RoleName,
    relative_paths: &[String],
    role_key_ids: &[KeyId],
    validity: Duration,
) -> Result<(), DelegationError> {
    let expires = Utc::now() + validity;
    let metadata = generate_targets_metadata(
        context.repository_dir(),
        relative_paths,
        METADATA_VERSION,
        expires,
    )?;
    sign_and_write(
        metadata,
        role_key_ids,
        keystore,
        &role.metadata_path(context.metadata_dir()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::keys::ScryptWorkFactor;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn scaffold() -> (TempDir, RepositoryContext) {
        let root = TempDir::new().unwrap();
        let keystore_dir = root.path().join("keystore");
        let repository_dir = root.path().join("repository");
        fs::create_dir(&keystore_dir).unwrap();
        fs::create_dir(&repository_dir).unwrap();
        fs::create_dir(repository_dir.join("metadata")).unwrap();
        fs::create_dir(repository_dir.join("targets")).unwrap();

        let mut role_passwords = BTreeMap::new();
        for (role, password) in [
            ("targets", "targets-pw"),
            ("targets/claimed", "claimed-pw"),
            ("targets/unclaimed", "unclaimed-pw"),
        ] {
            role_passwords.insert(role.to_string(), vec![password.to_string()]);
        }

        let context = RepositoryContext::initialize(RepositoryConfig {
            keystore_dir,
            repository_dir,
            role_passwords,
            work_factor: ScryptWorkFactor::WEAK,
            validity_days: 30,
        })
        .unwrap();
        (root, context)
    }

    #[test]
    fn test_provision_generates_then_reuses_keys() {
        let (_root, context) = scaffold();
        let mut keystore = Keystore::new();
        let role = RoleName::top_level();

        let first = provision_role_keys(&context, &mut keystore, &role).unwrap();
        assert_eq!(first.len(), 1);
        assert!(keystore.contains(&first[0]));

        // Write metadata signed with the provisioned key so the role is
        // recorded, then provision again: same key comes back.
        write_targets_metadata(
            &context,
            &keystore,
            &role,
            &[],
            &first,
            Duration::days(30),
        )
        .unwrap();

        let mut fresh_keystore = Keystore::new();
        let second = provision_role_keys(&context, &mut fresh_keystore, &role).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_provision_without_passwords_is_a_config_error() {
        let (_root, context) = scaffold();
        let mut keystore = Keystore::new();
        let role = RoleName::new("targets/unconfigured").unwrap();
        assert!(matches!(
            provision_role_keys(&context, &mut keystore, &role),
            Err(DelegationError::Config(ConfigError::NoPasswordsForRole(_)))
        ));
    }

    #[test]
    fn test_needs_delegation_true_without_metadata() {
        let (_root, context) = scaffold();
        let role = RoleName::new("targets/unclaimed").unwrap();
        let needed = needs_delegation(
            &context,
            &role,
            context.targets_dir(),
            &WalkOptions::default(),
            &FilePredicate::AcceptAny,
        )
        .unwrap();
        assert!(needed);
    }

    #[test]
    fn test_needs_delegation_false_after_write() {
        let (_root, context) = scaffold();
        fs::write(context.targets_dir().join("pkg1.tar"), b"payload").unwrap();

        let role = RoleName::top_level();
        let mut keystore = Keystore::new();
        let key_ids = provision_role_keys(&context, &mut keystore, &role).unwrap();
        write_targets_metadata(
            &context,
            &keystore,
            &role,
            &["targets/pkg1.tar".to_string()],
            &key_ids,
            Duration::days(30),
        )
        .unwrap();

        let needed = needs_delegation(
            &context,
            &role,
            context.targets_dir(),
            &WalkOptions::default(),
            &FilePredicate::AcceptAny,
        )
        .unwrap();
        assert!(!needed);

        // Touching the tree makes it stale again.
        fs::write(context.targets_dir().join("pkg2.tar"), b"new").unwrap();
        let needed = needs_delegation(
            &context,
            &role,
            context.targets_dir(),
            &WalkOptions::default(),
            &FilePredicate::AcceptAny,
        )
        .unwrap();
        assert!(needed);
    }

    #[test]
    fn test_make_delegation_rejects_non_child() {
        let (_root, context) = scaffold();
        let mut keystore = Keystore::new();
        let delegator = RoleName::new("targets/claimed").unwrap();
        let delegatee = RoleName::new("targets/unclaimed").unwrap();
        let constraint = PathConstraint::HashPrefix("0".to_string());

        let result = make_delegation(&context, &mut keystore, &delegator, &delegatee, &constraint);
        assert!(matches!(
            result,
            Err(DelegationError::Role(RoleError::NotADelegatee { .. }))
        ));
        // Precondition failures happen before any key is provisioned.
        assert!(keystore.is_empty());
    }

    #[test]
    fn test_write_targets_metadata_creates_parent_directory() {
        let (_root, context) = scaffold();
        let mut keystore = Keystore::new();
        let role = RoleName::new("targets/unclaimed").unwrap();
        let key_ids = provision_role_keys(&context, &mut keystore, &role).unwrap();

        write_targets_metadata(&context, &keystore, &role, &[], &key_ids, Duration::days(7))
            .unwrap();

        assert!(context
            .metadata_dir()
            .join("targets/unclaimed.json")
            .is_file());
    }
}
