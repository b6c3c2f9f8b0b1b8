//! Sync service configuration.
//!
//! Operational parameters for catch-up: check interval, thresholds and
//! request timeouts. Defaults mirror the constants below; any of them can be
//! overridden from a YAML file.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::downloader::SyncMode;

/// Interval between periodic catch-up checks (in milliseconds).
pub const SYNCER_CHECK_INTERVAL_MS: u64 = 6_000;

/// Height difference tolerated once a cycle has started.
pub const STOP_SYNC_HEIGHT_DIFF_THRESHOLD: u64 = 0;

/// Height difference at which the node counts as behind.
pub const START_SYNC_HEIGHT_DIFF_THRESHOLD: u64 = 2;

/// Multiple of the start threshold beyond which new txs are not cached.
pub const CACHE_NEW_TX_THRESHOLD_FACTOR: u64 = 3;

/// How long the downloader waits for a single response (in milliseconds).
pub const DOWNLOADER_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    #[serde(rename = "check_interval_ms", with = "crate::serde_utils::duration_millis")]
    pub check_interval: Duration,
    pub stop_threshold: u64,
    pub start_threshold: u64,
    pub cache_threshold_factor: u64,
    /// A seed node has no one to catch up to.
    pub bootstrap_node: bool,
    pub sync_mode: SyncMode,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(SYNCER_CHECK_INTERVAL_MS),
            stop_threshold: STOP_SYNC_HEIGHT_DIFF_THRESHOLD,
            start_threshold: START_SYNC_HEIGHT_DIFF_THRESHOLD,
            cache_threshold_factor: CACHE_NEW_TX_THRESHOLD_FACTOR,
            bootstrap_node: false,
            sync_mode: SyncMode::Full,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    #[serde(rename = "request_timeout_ms", with = "crate::serde_utils::duration_millis")]
    pub request_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DOWNLOADER_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Everything the sync layer reads from a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub syncer: SyncerConfig,
    pub downloader: DownloaderConfig,
}

impl SyncConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("invalid sync config")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sync config {path:?}"))?;
        Self::from_yaml_str(&contents)
    }
}
