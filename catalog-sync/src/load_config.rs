//! `load_config`: parses the static YAML service configuration into typed
//! structs. The only place untrusted YAML is read; everything past this
//! boundary works with rich types from `catalog-sync-core`.
//!
//! All errors here use `anyhow` for context-rich diagnostics surfaced at the
//! CLI boundary.

use anyhow::Result;
use catalog_sync_core::vendor::{OverrideEntry, OverrideMode};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Root of the snapshot/state layout the driver owns.
    pub working_dir: PathBuf,
    /// Destination directory of the update repository backend. Unused in
    /// dry-run mode.
    #[serde(default)]
    pub repository_dir: Option<PathBuf>,
    #[serde(default = "default_run_interval_minutes")]
    pub run_interval_minutes: u64,
    #[serde(default = "default_run_timeout_minutes")]
    pub run_timeout_minutes: u64,
    #[serde(default = "default_freshness_window_hours")]
    pub freshness_window_hours: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub update_visibility_store: bool,
    #[serde(default)]
    pub synthesize_detectoid_payload: bool,
    #[serde(default)]
    pub dump_profiles_after_run: bool,
    /// Explicit proxy tried once when the direct download path fails.
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub override_mode: OverrideMode,
    /// Vendor override entries, combined with the built-in profile set
    /// according to `override_mode`.
    #[serde(default)]
    pub vendors: Vec<OverrideEntry>,
}

fn default_run_interval_minutes() -> u64 {
    60
}

fn default_run_timeout_minutes() -> u64 {
    5
}

fn default_freshness_window_hours() -> i64 {
    24
}

fn default_batch_size() -> usize {
    500
}

/// Load and parse the YAML config file. Failures carry the path and the
/// underlying cause.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "loading configuration from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "failed to read config file");
            return Err(anyhow::anyhow!(
                "failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let config: Config = match serde_yaml::from_str(&content) {
        Ok(config) => {
            info!(config_path = ?path_ref, "parsed config YAML successfully");
            config
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "failed to parse config YAML");
            return Err(anyhow::anyhow!("failed to parse config YAML: {e}"));
        }
    };

    Ok(config)
}
