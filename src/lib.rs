//! tuf-delegate - Targets-role delegation for a trust-metadata repository
//!
//! This crate automates handing off signing authority from a delegator
//! targets role to a delegatee role: it decides when a role's signed
//! metadata is stale, provisions encrypted signing keys per role, records
//! the delegation (keys plus an explicit path list or a path-hash-prefix)
//! in the delegator's metadata, and writes the delegatee's own signed
//! targets metadata.

pub mod config;
pub mod delegation;
pub mod keys;
pub mod metadata;
pub mod role;
pub mod targets;

pub use config::{RepositoryConfig, RepositoryContext};
pub use delegation::{
    make_delegation, needs_delegation, provision_role_keys, write_targets_metadata,
    DelegationError,
};
pub use keys::{KeyId, Keystore, ScryptWorkFactor};
pub use role::{PathConstraint, RoleName};
pub use targets::{FilePredicate, WalkOptions};
