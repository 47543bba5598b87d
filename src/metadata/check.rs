//! Metadata-vs-file-tree comparison
//!
//! Decides whether a role's signed metadata still describes the live
//! target files: same set of repository-relative paths, same sizes, same
//! hashes. A role with no metadata file at all is reported through
//! [`CheckError::MissingRoleMetadata`] so callers can treat it as stale.

use std::io;
use std::path::Path;
use thiserror::Error;

use super::{MetadataError, SignedMetadata, TargetDescriptor};
use crate::role::RoleName;
use crate::targets::{relativize_paths, select_targets, FilePredicate, PathLayoutError, WalkOptions};

/// Errors from the comparator
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("no metadata exists for role {0}")]
    MissingRoleMetadata(RoleName),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Path(#[from] PathLayoutError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Compare a role's recorded targets against the live file tree
///
/// `files_dir` is the directory of interest for this role (usually a
/// subdirectory of `targets_dir`); discovery honors the traversal options
/// and predicate. Returns `Ok(true)` only when the recorded path set and
/// every descriptor match the files on disk.
pub fn metadata_matches_data(
    metadata_dir: &Path,
    targets_dir: &Path,
    role: &RoleName,
    files_dir: &Path,
    options: &WalkOptions,
    predicate: &FilePredicate,
) -> Result<bool, CheckError> {
    let metadata_path = role.metadata_path(metadata_dir);
    if !metadata_path.is_file() {
        return Err(CheckError::MissingRoleMetadata(role.clone()));
    }
    let signed = SignedMetadata::from_file(&metadata_path)?;

    let absolute = select_targets(files_dir, options, predicate)?;
    let live_paths = relativize_paths(targets_dir, &absolute)?;

    let recorded = &signed.signed.targets;
    if recorded.len() != live_paths.len() {
        return Ok(false);
    }

    let repository_dir = targets_dir.parent().ok_or_else(|| {
        PathLayoutError::TargetsDirectoryLayout(targets_dir.display().to_string())
    })?;
    for relative in &live_paths {
        let Some(descriptor) = recorded.get(relative) else {
            return Ok(false);
        };
        let current = TargetDescriptor::from_file(&repository_dir.join(relative))?;
        if current != *descriptor {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keystore;
    use crate::metadata::{generate_targets_metadata, sign_and_write};
    use chrono::{Duration, Utc};
    use ed25519_dalek::SigningKey;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        repo: TempDir,
        keystore: Keystore,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = TempDir::new().unwrap();
            fs::create_dir(repo.path().join("metadata")).unwrap();
            fs::create_dir(repo.path().join("targets")).unwrap();
            Self {
                repo,
                keystore: Keystore::new(),
            }
        }

        fn metadata_dir(&self) -> std::path::PathBuf {
            self.repo.path().join("metadata")
        }

        fn targets_dir(&self) -> std::path::PathBuf {
            self.repo.path().join("targets")
        }

        fn write_role_metadata(&mut self, role: &RoleName, relative_paths: &[String]) {
            let key_id = self
                .keystore
                .insert(SigningKey::generate(&mut rand::thread_rng()));
            let metadata = generate_targets_metadata(
                self.repo.path(),
                relative_paths,
                1,
                Utc::now() + Duration::days(30),
            )
            .unwrap();
            sign_and_write(
                metadata,
                &[key_id],
                &self.keystore,
                &role.metadata_path(&self.metadata_dir()),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_missing_metadata_is_an_error() {
        let fixture = Fixture::new();
        let role = RoleName::new("targets/unclaimed").unwrap();
        let result = metadata_matches_data(
            &fixture.metadata_dir(),
            &fixture.targets_dir(),
            &role,
            &fixture.targets_dir(),
            &WalkOptions::default(),
            &FilePredicate::AcceptAny,
        );
        assert!(matches!(result, Err(CheckError::MissingRoleMetadata(r)) if r == role));
    }

    #[test]
    fn test_matching_metadata() {
        let mut fixture = Fixture::new();
        fs::write(fixture.targets_dir().join("pkg1.tar"), b"payload").unwrap();

        let role = RoleName::top_level();
        fixture.write_role_metadata(&role, &["targets/pkg1.tar".to_string()]);

        let matched = metadata_matches_data(
            &fixture.metadata_dir(),
            &fixture.targets_dir(),
            &role,
            &fixture.targets_dir(),
            &WalkOptions::default(),
            &FilePredicate::AcceptAny,
        )
        .unwrap();
        assert!(matched);
    }

    #[test]
    fn test_new_file_breaks_match() {
        let mut fixture = Fixture::new();
        fs::write(fixture.targets_dir().join("pkg1.tar"), b"payload").unwrap();

        let role = RoleName::top_level();
        fixture.write_role_metadata(&role, &["targets/pkg1.tar".to_string()]);

        fs::write(fixture.targets_dir().join("pkg2.tar"), b"new").unwrap();
        let matched = metadata_matches_data(
            &fixture.metadata_dir(),
            &fixture.targets_dir(),
            &role,
            &fixture.targets_dir(),
            &WalkOptions::default(),
            &FilePredicate::AcceptAny,
        )
        .unwrap();
        assert!(!matched);
    }

    #[test]
    fn test_changed_content_breaks_match() {
        let mut fixture = Fixture::new();
        fs::write(fixture.targets_dir().join("pkg1.tar"), b"payload").unwrap();

        let role = RoleName::top_level();
        fixture.write_role_metadata(&role, &["targets/pkg1.tar".to_string()]);

        fs::write(fixture.targets_dir().join("pkg1.tar"), b"modified").unwrap();
        let matched = metadata_matches_data(
            &fixture.metadata_dir(),
            &fixture.targets_dir(),
            &role,
            &fixture.targets_dir(),
            &WalkOptions::default(),
            &FilePredicate::AcceptAny,
        )
        .unwrap();
        assert!(!matched);
    }
}
