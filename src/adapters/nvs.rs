//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`StoragePort`] for the record sets (through
//! [`KvBackend`](crate::storage::KvBackend)) and [`ConfigPort`] for the
//! persisted [`LinkConfig`].
//!
//! - Namespaces and keys are truncated to the NVS limit of 15 bytes.
//! - ESP-IDF NVS commits are atomic per `nvs_commit()`.
//! - Host builds use an in-memory map. Clones share the same map, so two
//!   adapters behave like two handles onto one flash partition.

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::LinkConfig;
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;
#[cfg(not(target_os = "espidf"))]
use std::sync::{Arc, Mutex};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "gwlink";
const CONFIG_KEY: &str = "linkcfg";

/// Largest blob accepted from NVS.
pub const MAX_BLOB_SIZE: usize = 64 * 1024;

/// NVS names are at most 15 bytes plus the terminator.
#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn nvs_name(s: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = s.as_bytes();
    let len = bytes.len().min(15);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

#[derive(Clone)]
pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl NvsAdapter {
    /// Create a new adapter and initialise NVS flash.
    ///
    /// On first boot or after a partition version change the partition is
    /// erased and re-initialised.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    #[cfg(not(target_os = "espidf"))]
    fn with_store<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Vec<u8>>) -> R,
    ) -> Result<R, StorageError> {
        let mut map = self.store.lock().map_err(|_| StorageError::IoError)?;
        Ok(f(&mut map))
    }

    /// Open an NVS namespace, run `f` with the handle, then close it.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = nvs_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn map_err(e: i32) -> StorageError {
        if e == ESP_ERR_NVS_NOT_FOUND {
            StorageError::NotFound
        } else if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
            StorageError::Full
        } else {
            StorageError::IoError
        }
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<LinkConfig, ConfigError> {
        let len = match self.len(CONFIG_NAMESPACE, CONFIG_KEY) {
            Ok(len) => len,
            Err(StorageError::NotFound) => {
                info!("NvsAdapter: no stored link config, using defaults");
                return Ok(LinkConfig::default());
            }
            Err(e) => {
                warn!("NvsAdapter: link config unreadable ({}), using defaults", e);
                return Ok(LinkConfig::default());
            }
        };
        let mut buf = vec![0u8; len];
        let n = self
            .read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf)
            .map_err(|_| ConfigError::IoError)?;
        let cfg: LinkConfig = postcard::from_bytes(&buf[..n]).map_err(|_| ConfigError::Corrupted)?;
        cfg.validate()?;
        info!("NvsAdapter: loaded link config ({} bytes)", n);
        Ok(cfg)
    }

    fn save(&self, config: &LinkConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        // Writes go through a clone: `StoragePort::write` takes `&mut self`
        // while `ConfigPort::save` does not, and clones share the backing
        // store.
        let mut port = self.clone();
        port.write(CONFIG_NAMESPACE, CONFIG_KEY, &bytes).map_err(|e| {
            warn!("NvsAdapter: link config write failed: {}", e);
            ConfigError::IoError
        })?;
        info!("NvsAdapter: link config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.with_store(|map| match map.get(&composite) {
                Some(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            })?
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            Self::with_nvs_handle(namespace, false, |handle| {
                let mut size = buf.len();
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), buf.as_mut_ptr().cast(), &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(size)
            })
            .map_err(Self::map_err)
        }
    }

    fn len(&self, namespace: &str, key: &str) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.with_store(|map| map.get(&composite).map(Vec::len))?
                .ok_or(StorageError::NotFound)
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            let size = Self::with_nvs_handle(namespace, false, |handle| {
                let mut size: usize = 0;
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr().cast(), core::ptr::null_mut(), &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(size)
            })
            .map_err(Self::map_err)?;
            if size > MAX_BLOB_SIZE {
                return Err(StorageError::Corrupt);
            }
            Ok(size)
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.with_store(|map| {
                map.insert(composite, data.to_vec());
            })
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(handle, key.as_ptr().cast(), data.as_ptr().cast(), data.len())
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
            .map_err(Self::map_err)
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.with_store(|map| {
                map.remove(&composite);
            })
        }

        #[cfg(target_os = "espidf")]
        {
            let key = nvs_name(key);
            Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe { nvs_erase_key(handle, key.as_ptr().cast()) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
            .map_err(Self::map_err)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.len(namespace, key).is_ok()
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_loads_defaults() {
        let nvs = NvsAdapter::new().unwrap();
        assert_eq!(nvs.load().unwrap(), LinkConfig::default());
    }

    #[test]
    fn config_round_trips_through_postcard() {
        let nvs = NvsAdapter::new().unwrap();
        let cfg = LinkConfig {
            response_timeout_ms: 4000,
            resync_rounds: 2,
            ..LinkConfig::default()
        };
        nvs.save(&cfg).unwrap();
        assert_eq!(nvs.load().unwrap(), cfg);
    }

    #[test]
    fn invalid_config_is_not_persisted() {
        let nvs = NvsAdapter::new().unwrap();
        let cfg = LinkConfig {
            read_chunk_size: 0,
            ..LinkConfig::default()
        };
        assert!(matches!(nvs.save(&cfg), Err(ConfigError::ValidationFailed(_))));
        assert!(!nvs.exists(CONFIG_NAMESPACE, CONFIG_KEY));
    }

    #[test]
    fn garbage_config_is_corrupted() {
        let mut nvs = NvsAdapter::new().unwrap();
        nvs.write(CONFIG_NAMESPACE, CONFIG_KEY, &[0xFF; 3]).unwrap();
        assert_eq!(nvs.load(), Err(ConfigError::Corrupted));
    }

    #[test]
    fn clones_share_storage() {
        let mut a = NvsAdapter::new().unwrap();
        let b = a.clone();
        a.write("gw", "k", b"abc").unwrap();
        assert!(b.exists("gw", "k"));
        assert_eq!(b.len("gw", "k"), Ok(3));
        let mut buf = [0u8; 8];
        assert_eq!(b.read("gw", "k", &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"abc");
        a.delete("gw", "k").unwrap();
        assert_eq!(b.len("gw", "k"), Err(StorageError::NotFound));
    }
}
