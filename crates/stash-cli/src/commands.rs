//! CLI command definitions.

use crate::logging::LogFormat;
use clap::{ArgAction, Args, Subcommand};
use stash_core::Compression;
use std::path::PathBuf;

/// Options shared by every subcommand.
///
/// Anything left unset falls back to the config file, then to built-in defaults.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Bucket holding cache entries
    #[arg(long, env = "STASH_BUCKET", global = true)]
    pub bucket: Option<String>,

    /// AWS region of the bucket
    #[arg(long, env = "AWS_REGION", global = true)]
    pub region: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", global = true, hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", global = true, hide_env_values = true)]
    pub secret_access_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN", global = true, hide_env_values = true)]
    pub session_token: Option<String>,

    /// Endpoint of an S3-compatible service
    #[arg(long, env = "STASH_ENDPOINT_URL", global = true)]
    pub endpoint_url: Option<String>,

    /// Use path-style bucket addressing; `--force-path-style=false` overrides the config file
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    pub force_path_style: Option<bool>,

    /// Archive compression (gzip, zstd, lz4, none)
    #[arg(long, env = "STASH_COMPRESSION", global = true)]
    pub compression: Option<Compression>,

    /// Listing pages fetched per restore key
    #[arg(long, global = true)]
    pub max_list_pages: Option<usize>,

    /// Multipart upload part size in bytes
    #[arg(long, global = true)]
    pub part_size: Option<usize>,

    /// Keep cache entries in a local directory instead of S3
    #[arg(long, env = "STASH_STORE_DIR", global = true)]
    pub store_dir: Option<PathBuf>,

    /// File carrying state from `restore` to `save`; must be private to one job
    #[arg(long, env = "STASH_STATE_FILE", global = true)]
    pub state_file: Option<PathBuf>,

    /// Per-job scratch directory the state file defaults into
    #[arg(long, env = "RUNNER_TEMP", global = true, hide = true)]
    pub runner_temp: Option<PathBuf>,

    /// Directory paths are resolved against
    #[arg(short = 'C', long, global = true)]
    pub working_dir: Option<PathBuf>,

    /// Config file
    #[arg(long, env = "STASH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// File outputs are appended to
    #[arg(long, env = "GITHUB_OUTPUT", global = true)]
    pub output_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Restore a cache entry into the working directory
    Restore(RestoreArgs),

    /// Check whether a cache entry exists without downloading it
    Lookup(KeyArgs),

    /// Save paths under a key unless the key already exists
    Save(SaveArgs),
}

/// Inputs identifying the entry to look for.
#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// Paths or globs to cache; may repeat or hold several lines
    #[arg(short, long = "path", value_name = "PATH")]
    pub paths: Vec<String>,

    /// Primary cache key
    #[arg(short, long)]
    pub key: Option<String>,

    /// Key prefixes tried in order when the primary key misses
    #[arg(short, long = "restore-key", value_name = "PREFIX")]
    pub restore_keys: Vec<String>,

    /// Fail when no entry matches
    #[arg(long)]
    pub fail_on_cache_miss: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub target: KeyArgs,

    /// Only check for a match; download nothing
    #[arg(long)]
    pub lookup_only: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Paths or globs to cache, used when `restore` recorded none
    #[arg(short, long = "path", value_name = "PATH")]
    pub paths: Vec<String>,

    /// Cache key, used when `restore` recorded none
    #[arg(short, long)]
    pub key: Option<String>,
}

/// Join repeated multi-line values into one newline-separated input.
pub fn join_lines(values: &[String]) -> String {
    values.join("\n")
}
