//! Link configuration parameters.
//!
//! All tunable timing and retry policy for the link. Values can be
//! overridden via NVS (postcard blob) or a JSON file for the host tool.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Floor for the call response timeout; the radio side may take this long
/// to answer a ZCL round-trip.
pub const MIN_RESPONSE_TIMEOUT_MS: u32 = 2500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    // --- Protocol ---
    /// Version byte written into every outbound frame.
    pub protocol_version: u8,

    // --- Calls ---
    /// How long a call waits for its `CMD_RSP` (never below 2500 ms).
    pub response_timeout_ms: u32,
    /// Write attempts per frame before the send is reported failed.
    pub tx_write_attempts: u8,

    // --- Reader ---
    /// Sleep between empty reads.
    pub reader_poll_interval_ms: u32,
    /// Bytes requested per transport read.
    pub read_chunk_size: u16,

    // --- Snapshot ---
    /// A snapshot with no record for this long is considered stalled.
    pub snapshot_idle_timeout_ms: u32,
    /// Minimum spacing between stall re-requests.
    pub snapshot_retry_gap_ms: u32,
    /// Stall re-requests per snapshot session.
    pub snapshot_retry_max: u8,
    /// Rounds the background resync task attempts before giving up.
    pub resync_rounds: u8,
    /// Wait for a BEGIN after each resync round.
    pub resync_backoff_ms: u32,

    // --- Device blob ---
    pub device_blob_idle_timeout_ms: u32,
    pub device_blob_retry_gap_ms: u32,
    pub device_blob_retry_max: u8,
    /// Largest transfer accepted.
    pub device_blob_max_len: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,

            response_timeout_ms: MIN_RESPONSE_TIMEOUT_MS,
            tx_write_attempts: 8,

            reader_poll_interval_ms: 50,
            read_chunk_size: 128,

            snapshot_idle_timeout_ms: 3000,
            snapshot_retry_gap_ms: 1000,
            snapshot_retry_max: 6,
            resync_rounds: 4,
            resync_backoff_ms: 1500,

            device_blob_idle_timeout_ms: 3000,
            device_blob_retry_gap_ms: 1000,
            device_blob_retry_max: 6,
            device_blob_max_len: 64 * 1024,
        }
    }
}

impl LinkConfig {
    /// Range-check every field. Values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol_version == 0 {
            return Err(ConfigError::ValidationFailed("protocol_version must be >= 1"));
        }
        if !(100..=60_000).contains(&self.response_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "response_timeout_ms must be 100–60000",
            ));
        }
        if !(1..=32).contains(&self.tx_write_attempts) {
            return Err(ConfigError::ValidationFailed("tx_write_attempts must be 1–32"));
        }
        if !(1..=1000).contains(&self.reader_poll_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "reader_poll_interval_ms must be 1–1000",
            ));
        }
        if !(16..=1024).contains(&self.read_chunk_size) {
            return Err(ConfigError::ValidationFailed("read_chunk_size must be 16–1024"));
        }
        if !(100..=60_000).contains(&self.snapshot_idle_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "snapshot_idle_timeout_ms must be 100–60000",
            ));
        }
        if !(100..=60_000).contains(&self.snapshot_retry_gap_ms) {
            return Err(ConfigError::ValidationFailed(
                "snapshot_retry_gap_ms must be 100–60000",
            ));
        }
        if self.snapshot_retry_max > 32 {
            return Err(ConfigError::ValidationFailed("snapshot_retry_max must be 0–32"));
        }
        if !(1..=32).contains(&self.resync_rounds) {
            return Err(ConfigError::ValidationFailed("resync_rounds must be 1–32"));
        }
        if !(10..=60_000).contains(&self.resync_backoff_ms) {
            return Err(ConfigError::ValidationFailed(
                "resync_backoff_ms must be 10–60000",
            ));
        }
        if !(100..=60_000).contains(&self.device_blob_idle_timeout_ms) {
            return Err(ConfigError::ValidationFailed(
                "device_blob_idle_timeout_ms must be 100–60000",
            ));
        }
        if !(100..=60_000).contains(&self.device_blob_retry_gap_ms) {
            return Err(ConfigError::ValidationFailed(
                "device_blob_retry_gap_ms must be 100–60000",
            ));
        }
        if self.device_blob_retry_max > 32 {
            return Err(ConfigError::ValidationFailed("device_blob_retry_max must be 0–32"));
        }
        if !(1..=1024 * 1024).contains(&self.device_blob_max_len) {
            return Err(ConfigError::ValidationFailed(
                "device_blob_max_len must be 1–1048576",
            ));
        }
        Ok(())
    }

    /// Response timeout with the 2500 ms floor applied.
    pub fn effective_response_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.response_timeout_ms.max(MIN_RESPONSE_TIMEOUT_MS)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.reader_poll_interval_ms))
    }

    pub fn resync_backoff(&self) -> Duration {
        Duration::from_millis(u64::from(self.resync_backoff_ms))
    }

    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        Ok(cfg)
    }
}
