//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements                 | Connects to             |
//! |------------|----------------------------|-------------------------|
//! | `log_sink` | EventSink, DeviceBlobSink  | Serial log output       |
//! | `nvs`      | ConfigPort, StoragePort    | NVS / in-memory store   |
//! | `uart`     | Transport                  | ESP-IDF UART driver     |

pub mod log_sink;
pub mod nvs;
#[cfg(target_os = "espidf")]
pub mod uart;
