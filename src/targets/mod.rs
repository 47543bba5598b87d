//! Target-file discovery and path relativization
//!
//! Walks a directory of target files under an acceptance predicate and
//! maps the resulting absolute paths to repository-relative paths of the
//! form `targets/...`.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors from target discovery and relativization
#[derive(Debug, Error)]
pub enum PathLayoutError {
    #[error("I/O error walking {dir}: {source}")]
    Walk {
        dir: String,
        #[source]
        source: walkdir::Error,
    },

    #[error("path {path} is not under the targets directory {targets_dir}")]
    OutsideTargetsDirectory { path: String, targets_dir: String },

    #[error("targets directory {0} is not under the repository root")]
    TargetsDirectoryLayout(String),

    #[error("path {0} is not valid UTF-8")]
    NonUtf8Path(String),

    #[error("glob pattern error: {0}")]
    Glob(#[from] globset::Error),
}

/// Traversal parameters for target discovery
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Descend into subdirectories
    pub recursive: bool,

    /// Follow symbolic links
    pub follow_links: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_links: true,
        }
    }
}

/// File-acceptance predicate applied during discovery
#[derive(Debug)]
pub enum FilePredicate {
    /// Accept every regular file
    AcceptAny,

    /// Accept files whose path relative to the walked directory matches
    /// any of the globs
    Glob(GlobSet),
}

impl FilePredicate {
    /// Build a glob predicate from patterns
    pub fn from_patterns(patterns: &[String]) -> Result<Self, PathLayoutError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self::Glob(builder.build()?))
    }

    fn accepts(&self, relative: &Path) -> bool {
        match self {
            Self::AcceptAny => true,
            Self::Glob(set) => set.is_match(relative),
        }
    }
}

/// Discover target files under `files_dir`
///
/// Returns the absolute paths of accepted regular files, sorted by file
/// name within each directory.
pub fn select_targets(
    files_dir: &Path,
    options: &WalkOptions,
    predicate: &FilePredicate,
) -> Result<Vec<PathBuf>, PathLayoutError> {
    let mut walker = WalkDir::new(files_dir).follow_links(options.follow_links);
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut paths = Vec::new();
    for entry in walker.sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry = entry.map_err(|source| PathLayoutError::Walk {
            dir: files_dir.display().to_string(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        // Predicates see the path relative to the walked directory.
        let relative = entry
            .path()
            .strip_prefix(files_dir)
            .unwrap_or_else(|_| entry.path());
        if !predicate.accepts(relative) {
            continue;
        }

        paths.push(entry.path().to_path_buf());
    }

    Ok(paths)
}

/// Map absolute target paths to repository-relative paths
///
/// Every input must be a descendant of `targets_dir`, which itself must be
/// the `targets/` subdirectory of the repository root; outputs are
/// relative to the repository root and therefore begin with `targets/`.
pub fn relativize_paths(
    targets_dir: &Path,
    absolute_paths: &[PathBuf],
) -> Result<Vec<String>, PathLayoutError> {
    let repository_dir = targets_dir
        .parent()
        .ok_or_else(|| PathLayoutError::TargetsDirectoryLayout(targets_dir.display().to_string()))?;

    let mut relative_paths = Vec::with_capacity(absolute_paths.len());
    for absolute in absolute_paths {
        if !absolute.starts_with(targets_dir) || absolute.as_path() == targets_dir {
            return Err(PathLayoutError::OutsideTargetsDirectory {
                path: absolute.display().to_string(),
                targets_dir: targets_dir.display().to_string(),
            });
        }
        let relative = absolute
            .strip_prefix(repository_dir)
            .map_err(|_| PathLayoutError::OutsideTargetsDirectory {
                path: absolute.display().to_string(),
                targets_dir: targets_dir.display().to_string(),
            })?;
        let relative = relative
            .to_str()
            .ok_or_else(|| PathLayoutError::NonUtf8Path(absolute.display().to_string()))?;
        relative_paths.push(relative.to_string());
    }

    Ok(relative_paths)
}
