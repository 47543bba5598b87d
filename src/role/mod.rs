//! Targets role names and delegation path constraints
//!
//! Role names form a slash-delimited hierarchy rooted at `targets`
//! (`targets`, `targets/claimed`, `targets/claimed/django`, ...). A
//! delegatee's name always extends its delegator's name by one or more
//! components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the top-level targets role
pub const TOP_LEVEL_ROLE: &str = "targets";

/// File extension for on-disk metadata documents
pub const METADATA_EXTENSION: &str = "json";

/// Precondition failures on role names and path constraints
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("invalid role name {0:?}: must be \"targets\" or start with \"targets/\"")]
    InvalidName(String),

    #[error("invalid role name {0:?}: empty path component")]
    EmptyComponent(String),

    #[error("role {delegatee:?} is not a delegatee of {delegator:?}")]
    NotADelegatee { delegator: String, delegatee: String },

    #[error("exactly one of delegated paths or path-hash-prefix must be given")]
    AmbiguousPathConstraint,
}

/// A validated targets role name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    /// Parse and validate a role name
    pub fn new(name: impl Into<String>) -> Result<Self, RoleError> {
        let name = name.into();
        if name != TOP_LEVEL_ROLE && !name.starts_with("targets/") {
            return Err(RoleError::InvalidName(name));
        }
        if name.split('/').any(|component| component.is_empty()) {
            return Err(RoleError::EmptyComponent(name));
        }
        Ok(Self(name))
    }

    /// The top-level `targets` role
    pub fn top_level() -> Self {
        Self(TOP_LEVEL_ROLE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component (`"targets/a/b"` -> `"b"`)
    pub fn local_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Everything before the last component (`"targets/a/b"` -> `"targets/a"`,
    /// `"targets"` -> `""`)
    pub fn parent_path(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// Whether `delegatee` extends this role by the `self + "/"` prefix
    pub fn is_delegator_of(&self, delegatee: &RoleName) -> bool {
        delegatee
            .0
            .strip_prefix(&self.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The delegatee's name with this role's prefix stripped
    ///
    /// Delegator `targets/a` and delegatee `targets/a/b` yield `b`.
    pub fn delegatee_local_name<'a>(&self, delegatee: &'a RoleName) -> Result<&'a str, RoleError> {
        delegatee
            .0
            .strip_prefix(&self.0)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| RoleError::NotADelegatee {
                delegator: self.0.clone(),
                delegatee: delegatee.0.clone(),
            })
    }

    /// Location of this role's metadata file under `metadata_dir`
    ///
    /// The metadata tree mirrors the role hierarchy: role `targets/a/b`
    /// lives at `<metadata_dir>/targets/a/b.json`.
    pub fn metadata_path(&self, metadata_dir: &Path) -> PathBuf {
        let mut path = metadata_dir.join(self.parent_path());
        path.push(format!("{}.{}", self.local_name(), METADATA_EXTENSION));
        path
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoleName {
    type Error = RoleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0
    }
}

/// How a delegation partitions responsibility for target paths
///
/// Exactly one strategy applies to any delegation: either an explicit
/// ordered list of repository-relative paths, or a path-hash-prefix that
/// claims every target whose hashed path falls under the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathConstraint {
    /// Explicit paths relative to the repository root (`targets/...`)
    Paths(Vec<String>),

    /// Hex prefix over SHA-256 of the target path
    HashPrefix(String),
}

impl PathConstraint {
    /// Build a constraint from two optionals, enforcing exclusivity
    ///
    /// Callers that surface both choices (the CLI, config files) funnel
    /// through here; both-present and both-absent are precondition
    /// failures.
    pub fn from_parts(
        paths: Option<Vec<String>>,
        hash_prefix: Option<String>,
    ) -> Result<Self, RoleError> {
        match (paths, hash_prefix) {
            (Some(paths), None) => Ok(Self::Paths(paths)),
            (None, Some(prefix)) => Ok(Self::HashPrefix(prefix)),
            _ => Err(RoleError::AmbiguousPathConstraint),
        }
    }
}
