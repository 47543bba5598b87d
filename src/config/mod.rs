//! Repository configuration and initialization
//!
//! An explicit, immutable configuration object replaces ambient
//! process-global state: directory locations, the role-to-passwords
//! table (one password per key, order significant), the key-at-rest work
//! factor and the default metadata validity. `RepositoryContext`
//! validates the on-disk layout once, up front.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::keys::ScryptWorkFactor;
use crate::role::RoleName;

/// Subdirectory of the repository holding metadata files
pub const METADATA_SUBDIR: &str = "metadata";

/// Subdirectory of the repository holding target files
pub const TARGETS_SUBDIR: &str = "targets";

/// Default metadata validity in days
pub const DEFAULT_VALIDITY_DAYS: i64 = 90;

/// Errors from configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0} is not a directory")]
    NotADirectory(String),

    #[error("no passwords configured for role {0}")]
    NoPasswordsForRole(RoleName),

    #[error("invalid role name in password table: {0}")]
    InvalidRole(#[from] crate::role::RoleError),
}

/// Static configuration for one repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Directory of encrypted key files
    pub keystore_dir: PathBuf,

    /// Repository root, containing `metadata/` and `targets/`
    pub repository_dir: PathBuf,

    /// Fully-qualified role name to its ordered key passwords
    pub role_passwords: BTreeMap<String, Vec<String>>,

    /// Work factor protecting key files at rest
    #[serde(default)]
    pub work_factor: ScryptWorkFactor,

    /// Validity in days for newly written metadata
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,
}

fn default_validity_days() -> i64 {
    DEFAULT_VALIDITY_DAYS
}

impl RepositoryConfig {
    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Ordered passwords configured for `role`
    pub fn passwords_for(&self, role: &RoleName) -> Result<&[String], ConfigError> {
        self.role_passwords
            .get(role.as_str())
            .filter(|passwords| !passwords.is_empty())
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::NoPasswordsForRole(role.clone()))
    }
}

/// A validated repository: configuration plus derived directory paths
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    config: RepositoryConfig,
    metadata_dir: PathBuf,
    targets_dir: PathBuf,
}

impl RepositoryContext {
    /// Validate the configured layout and build a context
    ///
    /// The keystore and repository directories must exist, as must the
    /// repository's `metadata/` and `targets/` subdirectories. Role names
    /// in the password table are validated here, once.
    pub fn initialize(config: RepositoryConfig) -> Result<Self, ConfigError> {
        for dir in [&config.keystore_dir, &config.repository_dir] {
            if !dir.is_dir() {
                return Err(ConfigError::NotADirectory(dir.display().to_string()));
            }
        }

        let metadata_dir = config.repository_dir.join(METADATA_SUBDIR);
        let targets_dir = config.repository_dir.join(TARGETS_SUBDIR);
        for dir in [&metadata_dir, &targets_dir] {
            if !dir.is_dir() {
                return Err(ConfigError::NotADirectory(dir.display().to_string()));
            }
        }

        for role_name in config.role_passwords.keys() {
            RoleName::new(role_name.clone())?;
        }

        Ok(Self {
            config,
            metadata_dir,
            targets_dir,
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn keystore_dir(&self) -> &Path {
        &self.config.keystore_dir
    }

    pub fn repository_dir(&self) -> &Path {
        &self.config.repository_dir
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    pub fn targets_dir(&self) -> &Path {
        &self.targets_dir
    }

    /// Validity window for newly written metadata
    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::days(self.config.validity_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scaffold() -> (TempDir, RepositoryConfig) {
        let root = TempDir::new().unwrap();
        let keystore_dir = root.path().join("keystore");
        let repository_dir = root.path().join("repository");
        fs::create_dir(&keystore_dir).unwrap();
        fs::create_dir(&repository_dir).unwrap();
        fs::create_dir(repository_dir.join(METADATA_SUBDIR)).unwrap();
        fs::create_dir(repository_dir.join(TARGETS_SUBDIR)).unwrap();

        let mut role_passwords = BTreeMap::new();
        role_passwords.insert("targets".to_string(), vec!["targets-pw".to_string()]);
        role_passwords.insert(
            "targets/unclaimed".to_string(),
            vec!["unclaimed-pw".to_string()],
        );

        let config = RepositoryConfig {
            keystore_dir,
            repository_dir,
            role_passwords,
            work_factor: ScryptWorkFactor::WEAK,
            validity_days: 30,
        };
        (root, config)
    }

    #[test]
    fn test_initialize_validates_layout() {
        let (_root, config) = scaffold();
        let context = RepositoryContext::initialize(config.clone()).unwrap();
        assert_eq!(
            context.metadata_dir(),
            config.repository_dir.join(METADATA_SUBDIR)
        );
        assert_eq!(
            context.targets_dir(),
            config.repository_dir.join(TARGETS_SUBDIR)
        );
    }

    #[test]
    fn test_initialize_rejects_missing_directories() {
        let (root, mut config) = scaffold();
        config.keystore_dir = root.path().join("nope");
        assert!(matches!(
            RepositoryContext::initialize(config),
            Err(ConfigError::NotADirectory(_))
        ));

        let (_root, config) = scaffold();
        fs::remove_dir(config.repository_dir.join(TARGETS_SUBDIR)).unwrap();
        assert!(matches!(
            RepositoryContext::initialize(config),
            Err(ConfigError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_initialize_rejects_bad_role_names() {
        let (_root, mut config) = scaffold();
        config
            .role_passwords
            .insert("snapshot".to_string(), vec!["pw".to_string()]);
        assert!(matches!(
            RepositoryContext::initialize(config),
            Err(ConfigError::InvalidRole(_))
        ));
    }

    #[test]
    fn test_passwords_for_role() {
        let (_root, config) = scaffold();
        let role = RoleName::top_level();
        assert_eq!(config.passwords_for(&role).unwrap(), ["targets-pw"]);

        let unknown = RoleName::new("targets/claimed").unwrap();
        assert!(matches!(
            config.passwords_for(&unknown),
            Err(ConfigError::NoPasswordsForRole(_))
        ));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("delegate.toml");
        fs::write(
            &path,
            r#"
keystore_dir = "/tmp/keystore"
repository_dir = "/tmp/repository"
validity_days = 14

[role_passwords]
"targets" = ["targets-pw"]
"targets/unclaimed" = ["unclaimed-pw"]
"#,
        )
        .unwrap();

        let config = RepositoryConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.validity_days, 14);
        assert_eq!(config.work_factor, ScryptWorkFactor::DEFAULT);
        assert_eq!(config.role_passwords["targets"], vec!["targets-pw"]);
    }

    #[test]
    fn test_from_toml_file_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            RepositoryConfig::from_toml_file(&missing),
            Err(ConfigError::Io { .. })
        ));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "not toml [").unwrap();
        assert!(matches!(
            RepositoryConfig::from_toml_file(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }
}
