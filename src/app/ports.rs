//! Port traits: the boundary between the link core and the rest of the gateway.
//!
//! ```text
//!   Link (dispatcher) ──▶ EventSink / DeviceRegistry / DeviceBlobSink
//!   RecordSet         ──▶ StoragePort (via KvBackend)
//!   LinkConfig        ◀─▶ ConfigPort
//! ```
//!
//! The dispatcher runs on the link I/O thread and calls these from there;
//! implementations must return quickly and never block on the link itself.

use crate::app::events::LinkEvent;
use crate::app::model::{DeviceInfo, EndpointInfo};
use crate::config::LinkConfig;

// ───────────────────────────────────────────────────────────────
// Event sink (link → application)
// ───────────────────────────────────────────────────────────────

/// Receives every event published by the radio side, plus attribute
/// state carried inside snapshots.
pub trait EventSink {
    fn emit(&mut self, event: &LinkEvent);
}

// ───────────────────────────────────────────────────────────────
// Device registry (snapshot hooks)
// ───────────────────────────────────────────────────────────────

/// Receives the device inventory streamed during a snapshot.
///
/// Shared between the link I/O thread and application callers, hence
/// `&self` receivers. Implementations provide their own interior locking.
pub trait DeviceRegistry {
    /// A snapshot announcing `total` devices has started.
    fn snapshot_begin(&self, total: u16) -> crate::Result<()>;

    fn upsert_device(&self, device: &DeviceInfo) -> crate::Result<()>;

    fn upsert_endpoint(&self, endpoint: &EndpointInfo) -> crate::Result<()>;

    fn remove_device(&self, uid: &str) -> crate::Result<()>;

    /// The snapshot stream is closed, complete or not.
    fn snapshot_end(&self) -> crate::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Device blob sink
// ───────────────────────────────────────────────────────────────

/// Receives a fully reassembled device blob transfer.
pub trait DeviceBlobSink {
    fn store(&mut self, blob: &[u8]) -> crate::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads and persists the link configuration.
///
/// Implementations MUST validate before persisting. Out-of-range values are
/// rejected with [`ConfigError::ValidationFailed`], not silently clamped.
pub trait ConfigPort {
    /// Returns [`LinkConfig::default()`] if nothing is stored.
    fn load(&self) -> Result<LinkConfig, ConfigError>;

    fn save(&self, config: &LinkConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (namespaced key/value blobs)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value blob storage.
///
/// Write operations MUST be atomic: no partial blob is ever observable
/// after power loss. ESP-IDF NVS guarantees this per commit.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Size in bytes of the stored value.
    fn len(&self, namespace: &str, key: &str) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A field failed range validation. Names the field and its range.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] and record set operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key or record does not exist.
    NotFound,
    /// Record set is at capacity.
    Full,
    /// Generic I/O error.
    IoError,
    /// Persisted blob is structurally invalid (count over capacity, truncated body).
    Corrupt,
    /// Descriptor has a zero item size or capacity.
    InvalidDescriptor,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupt => write!(f, "stored data corrupt"),
            Self::InvalidDescriptor => write!(f, "invalid record set descriptor"),
        }
    }
}
