//! gwlink: the framed UART link between the radio and application
//! controllers of a split-role Zigbee gateway.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Adapters (outer ring)                      │
//! │   UartTransport   NvsAdapter       LogEventSink              │
//! │   (Transport)     (Config+Storage) (EventSink)               │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │   link   Link · Correlator · Dispatcher · reassembly         │
//! │   proto  Frame · FrameDecoder · payload records              │
//! │   stores DeviceStore · SettingsStore  (over storage)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; everything else builds and tests on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod json;
pub mod link;
pub mod pins;
pub mod proto;
pub mod storage;
pub mod stores;

#[cfg(target_os = "espidf")]
mod esp_link_shims;

pub use error::{Error, Result};
pub use link::Link;
