//! tuf-delegate CLI
//!
//! Entry point for the `tuf-delegate` command-line tool.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use tuf_delegate::targets::{relativize_paths, select_targets};
use tuf_delegate::{
    make_delegation, needs_delegation, provision_role_keys, write_targets_metadata,
    FilePredicate, Keystore, PathConstraint, RepositoryConfig, RepositoryContext, RoleName,
    WalkOptions,
};

#[derive(Parser)]
#[command(name = "tuf-delegate")]
#[command(about = "Targets-role delegation for a trust-metadata repository", version)]
struct Cli {
    /// Path to the repository config file
    #[arg(long, short = 'c', default_value = "delegate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a role's metadata is stale (exit 0: current,
    /// 1: delegation needed)
    Check {
        /// Role to evaluate (targets or targets/...)
        role: String,

        /// Directory of target files of interest (default: the
        /// repository's targets directory)
        files_dir: Option<PathBuf>,

        #[command(flatten)]
        walk: WalkArgs,
    },

    /// Create or refresh a delegation from delegator to delegatee
    Delegate {
        /// Delegator role name
        delegator: String,

        /// Delegatee role name (must extend the delegator)
        delegatee: String,

        /// Delegate the files discovered under this directory
        #[arg(long, conflicts_with = "path_hash_prefix")]
        paths_from: Option<PathBuf>,

        /// Delegate by path-hash-prefix instead of explicit paths
        #[arg(long)]
        path_hash_prefix: Option<String>,

        #[command(flatten)]
        walk: WalkArgs,
    },

    /// Write a role's own signed targets metadata from a file tree
    WriteTargets {
        /// Role to write metadata for
        role: String,

        /// Directory of the role's target files
        files_dir: PathBuf,

        #[command(flatten)]
        walk: WalkArgs,
    },
}

#[derive(Args)]
struct WalkArgs {
    /// Do not descend into subdirectories
    #[arg(long)]
    no_recursive: bool,

    /// Do not follow symbolic links
    #[arg(long)]
    no_follow_links: bool,

    /// Only accept files matching these glob patterns
    #[arg(long = "match", value_name = "GLOB")]
    patterns: Vec<String>,
}

impl WalkArgs {
    fn options(&self) -> WalkOptions {
        WalkOptions {
            recursive: !self.no_recursive,
            follow_links: !self.no_follow_links,
        }
    }

    fn predicate(&self) -> FilePredicate {
        if self.patterns.is_empty() {
            FilePredicate::AcceptAny
        } else {
            match FilePredicate::from_patterns(&self.patterns) {
                Ok(predicate) => predicate,
                Err(e) => {
                    eprintln!("Invalid --match pattern: {}", e);
                    process::exit(2);
                }
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let context = match load_context(&cli.config) {
        Ok(context) => context,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(2);
        }
    };

    match cli.command {
        Commands::Check {
            role,
            files_dir,
            walk,
        } => run_check(&context, &role, files_dir, &walk),
        Commands::Delegate {
            delegator,
            delegatee,
            paths_from,
            path_hash_prefix,
            walk,
        } => run_delegate(
            &context,
            &delegator,
            &delegatee,
            paths_from,
            path_hash_prefix,
            &walk,
        ),
        Commands::WriteTargets {
            role,
            files_dir,
            walk,
        } => run_write_targets(&context, &role, &files_dir, &walk),
    }
}

fn load_context(config_path: &PathBuf) -> Result<RepositoryContext, String> {
    let config = RepositoryConfig::from_toml_file(config_path).map_err(|e| e.to_string())?;
    RepositoryContext::initialize(config).map_err(|e| e.to_string())
}

fn parse_role(name: &str) -> RoleName {
    match RoleName::new(name) {
        Ok(role) => role,
        Err(e) => {
            eprintln!("Invalid role: {}", e);
            process::exit(2);
        }
    }
}

fn run_check(context: &RepositoryContext, role: &str, files_dir: Option<PathBuf>, walk: &WalkArgs) {
    let role = parse_role(role);
    let files_dir = files_dir.unwrap_or_else(|| context.targets_dir().to_path_buf());

    match needs_delegation(context, &role, &files_dir, &walk.options(), &walk.predicate()) {
        Ok(true) => {
            println!("{}: delegation needed", role);
            process::exit(1);
        }
        Ok(false) => {
            println!("{}: metadata is current", role);
        }
        Err(e) => {
            eprintln!("Error checking {}: {}", role, e);
            process::exit(2);
        }
    }
}

fn run_delegate(
    context: &RepositoryContext,
    delegator: &str,
    delegatee: &str,
    paths_from: Option<PathBuf>,
    path_hash_prefix: Option<String>,
    walk: &WalkArgs,
) {
    let delegator = parse_role(delegator);
    let delegatee = parse_role(delegatee);
    let mut keystore = Keystore::new();

    let relative_paths = match paths_from {
        Some(ref files_dir) => match discover_relative_paths(context, files_dir, walk) {
            Ok(paths) => Some(paths),
            Err(e) => {
                eprintln!("Error discovering target files: {}", e);
                process::exit(2);
            }
        },
        None => None,
    };

    let constraint = match PathConstraint::from_parts(relative_paths.clone(), path_hash_prefix) {
        Ok(constraint) => constraint,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    if let Err(e) = make_delegation(context, &mut keystore, &delegator, &delegatee, &constraint) {
        eprintln!("Error delegating {} -> {}: {}", delegator, delegatee, e);
        process::exit(2);
    }
    println!("Recorded delegation {} -> {}", delegator, delegatee);

    // With an explicit path list the delegatee's own metadata can be
    // written in the same run; a hash-prefix delegation enumerates no
    // concrete paths, so the delegatee is written separately.
    if let Some(paths) = relative_paths {
        let key_ids = match provision_role_keys(context, &mut keystore, &delegatee) {
            Ok(key_ids) => key_ids,
            Err(e) => {
                eprintln!("Error provisioning keys for {}: {}", delegatee, e);
                process::exit(2);
            }
        };
        if let Err(e) = write_targets_metadata(
            context,
            &keystore,
            &delegatee,
            &paths,
            &key_ids,
            context.validity(),
        ) {
            eprintln!("Error writing metadata for {}: {}", delegatee, e);
            process::exit(2);
        }
        println!(
            "Wrote targets metadata for {} ({} files)",
            delegatee,
            paths.len()
        );
    }
}

fn run_write_targets(context: &RepositoryContext, role: &str, files_dir: &PathBuf, walk: &WalkArgs) {
    let role = parse_role(role);
    let mut keystore = Keystore::new();

    let relative_paths = match discover_relative_paths(context, files_dir, walk) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error discovering target files: {}", e);
            process::exit(2);
        }
    };

    let key_ids = match provision_role_keys(context, &mut keystore, &role) {
        Ok(key_ids) => key_ids,
        Err(e) => {
            eprintln!("Error provisioning keys for {}: {}", role, e);
            process::exit(2);
        }
    };

    if let Err(e) = write_targets_metadata(
        context,
        &keystore,
        &role,
        &relative_paths,
        &key_ids,
        context.validity(),
    ) {
        eprintln!("Error writing metadata for {}: {}", role, e);
        process::exit(2);
    }
    println!(
        "Wrote targets metadata for {} ({} files)",
        role,
        relative_paths.len()
    );
}

fn discover_relative_paths(
    context: &RepositoryContext,
    files_dir: &PathBuf,
    walk: &WalkArgs,
) -> Result<Vec<String>, String> {
    let absolute =
        select_targets(files_dir, &walk.options(), &walk.predicate()).map_err(|e| e.to_string())?;
    relativize_paths(context.targets_dir(), &absolute).map_err(|e| e.to_string())
}
