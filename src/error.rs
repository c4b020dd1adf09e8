//! Unified error types for the gateway link.
//!
//! A single `Error` enum that every subsystem converts into, so callers of
//! the link, the stores and the config layer handle one type. All variants
//! are `Copy` so they can cross the correlator signal without allocation.

use core::fmt;

use crate::app::ports::{ConfigError, StorageError};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Framing or payload decode failure.
    Proto(ProtoError),
    /// No matching response before the deadline.
    Timeout,
    /// Peer (or local subsystem) is not ready.
    NotReady,
    /// Addressed device, key or record does not exist.
    NotFound,
    /// Peer does not implement the command.
    Unsupported,
    /// Another call holds the link.
    Busy,
    /// Arguments rejected before or after transmission.
    InvalidArgs,
    /// Unclassified peer or local failure.
    Internal,
    /// Byte channel write failed after all attempts.
    Transport,
    /// Record set backend failure.
    Storage(StorageError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proto(e) => write!(f, "protocol: {e}"),
            Self::Timeout => write!(f, "timed out"),
            Self::NotReady => write!(f, "not ready"),
            Self::NotFound => write!(f, "not found"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Busy => write!(f, "busy"),
            Self::InvalidArgs => write!(f, "invalid arguments"),
            Self::Internal => write!(f, "internal error"),
            Self::Transport => write!(f, "transport write failed"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoError {
    /// Bytes do not form a valid frame or payload.
    Format,
    /// Frame check sequence mismatch.
    Crc,
    /// Payload or frame exceeds its bound, or the output buffer is too small.
    Size,
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format => write!(f, "malformed frame"),
            Self::Crc => write!(f, "CRC mismatch"),
            Self::Size => write!(f, "size out of range"),
        }
    }
}

impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        Self::Proto(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => Self::NotFound,
            other => Self::Storage(other),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
