//! Concrete record sets built on [`crate::storage`].

pub mod devices;
pub mod settings;

pub use devices::{DeviceRecord, DeviceStore, StoredEndpoint};
pub use settings::{ProjectSettings, SettingsStore};
