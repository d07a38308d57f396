//! CLI configuration management.

use crate::commands::GlobalArgs;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use stash_core::Compression;
use stash_store::S3Config;
use std::path::{Path, PathBuf};

/// State file name inside the runner's per-job temp directory.
const STATE_FILE_NAME: &str = "stash-state.json";

/// Defaults read from the config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StashConfig {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub compression: Compression,
    pub max_list_pages: Option<usize>,
    pub part_size: Option<usize>,
    /// Local directory used instead of S3.
    pub store_dir: Option<PathBuf>,
}

/// Where cache entries live.
#[derive(Debug, Clone)]
pub enum StoreTarget {
    S3(S3Config),
    Directory(PathBuf),
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub store: StoreTarget,
    pub compression: Compression,
    pub working_dir: PathBuf,
    pub state_file: PathBuf,
    pub output_file: Option<PathBuf>,
}

impl StashConfig {
    /// Load the given file, or the default one when it exists.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::read(path),
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Default config file path.
    pub fn config_path() -> Option<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "stash")?;
        Some(dirs.config_dir().join("config.yaml"))
    }

    /// Merge flags over the file values.
    pub fn resolve(self, args: &GlobalArgs) -> anyhow::Result<Settings> {
        let store = match args.store_dir.clone().or(self.store_dir) {
            Some(dir) => StoreTarget::Directory(dir),
            None => {
                let Some(bucket) = args.bucket.clone().or(self.bucket) else {
                    bail!("Input required and not supplied: bucket");
                };
                let mut s3 = S3Config::new(bucket);
                s3.region = args.region.clone().or(self.region);
                s3.access_key_id = args.access_key_id.clone();
                s3.secret_access_key = args.secret_access_key.clone();
                s3.session_token = args.session_token.clone();
                s3.endpoint_url = args.endpoint_url.clone().or(self.endpoint_url);
                s3.force_path_style = args.force_path_style.unwrap_or(self.force_path_style);
                if let Some(pages) = args.max_list_pages.or(self.max_list_pages) {
                    s3.max_list_pages = pages;
                }
                if let Some(size) = args.part_size.or(self.part_size) {
                    s3.part_size = size;
                }
                s3.validate()?;
                StoreTarget::S3(s3)
            }
        };

        let working_dir = match &args.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to read the current directory")?,
        };
        let state_file = match (&args.state_file, &args.runner_temp) {
            (Some(file), _) => file.clone(),
            (None, Some(dir)) => dir.join(STATE_FILE_NAME),
            (None, None) => bail!(
                "No per-job state file: pass --state-file or set STASH_STATE_FILE \
                 (RUNNER_TEMP is used when set)"
            ),
        };

        Ok(Settings {
            store,
            compression: args.compression.unwrap_or(self.compression),
            working_dir,
            state_file,
            output_file: args.output_file.clone(),
        })
    }
}
