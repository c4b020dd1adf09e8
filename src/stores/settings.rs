//! Gateway-wide user settings, persisted as a single-record set.
//!
//! Whatever is stored is validated at init; anything out of range or
//! structurally broken is replaced by the defaults and written back.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::StorageError;
use crate::error::{Error, Result};
use crate::proto::payload::{get_u16, get_u32, put_u16, put_u32};
use crate::storage::{Descriptor, FixedRecord, RecordSet, StorageBackend};

pub const DESCRIPTOR: Descriptor = Descriptor {
    key: "proj_settings",
    namespace: "settings",
    item_size: ProjectSettings::SIZE,
    max_items: 1,
    magic: 0x5354_5447, // "STTG"
    version: 1,
};

const RECORD_KEY: &str = "settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Idle time before the display blanks (1 s – 10 min).
    pub screensaver_timeout_ms: u32,
    /// Weather refresh period after a successful fetch (1 min – 24 h).
    pub weather_success_interval_ms: u32,
    /// Weather retry period after a failed fetch (3 s – 10 min).
    pub weather_retry_interval_ms: u32,
    pub timezone_auto: bool,
    /// Manual UTC offset in minutes (−12 h – +14 h).
    pub timezone_offset_min: i16,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            screensaver_timeout_ms: 4_000,
            weather_success_interval_ms: 60 * 60 * 1000,
            weather_retry_interval_ms: 10_000,
            timezone_auto: true,
            timezone_offset_min: 0,
        }
    }
}

impl ProjectSettings {
    /// Range-check every field, naming the first one out of range.
    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        if !(1_000..=600_000).contains(&self.screensaver_timeout_ms) {
            return Err("screensaver_timeout_ms must be 1000..=600000");
        }
        if !(60_000..=86_400_000).contains(&self.weather_success_interval_ms) {
            return Err("weather_success_interval_ms must be 60000..=86400000");
        }
        if !(3_000..=600_000).contains(&self.weather_retry_interval_ms) {
            return Err("weather_retry_interval_ms must be 3000..=600000");
        }
        if !(-720..=840).contains(&self.timezone_offset_min) {
            return Err("timezone_offset_min must be -720..=840");
        }
        Ok(())
    }
}

// screensaver u32 @0, weather_ok u32 @4, weather_retry u32 @8,
// tz_auto u8 @12, pad @13, tz_offset i16 @14.
impl FixedRecord for ProjectSettings {
    const SIZE: usize = 16;

    fn key(&self) -> &str {
        RECORD_KEY
    }

    fn encode(&self, out: &mut [u8]) {
        put_u32(out, 0, self.screensaver_timeout_ms);
        put_u32(out, 4, self.weather_success_interval_ms);
        put_u32(out, 8, self.weather_retry_interval_ms);
        out[12] = u8::from(self.timezone_auto);
        put_u16(out, 14, self.timezone_offset_min as u16);
    }

    fn decode(raw: &[u8]) -> core::result::Result<Self, StorageError> {
        Ok(Self {
            screensaver_timeout_ms: get_u32(raw, 0),
            weather_success_interval_ms: get_u32(raw, 4),
            weather_retry_interval_ms: get_u32(raw, 8),
            timezone_auto: raw[12] != 0,
            timezone_offset_min: get_u16(raw, 14) as i16,
        })
    }
}

pub struct SettingsStore<B> {
    set: RecordSet<ProjectSettings, B>,
}

impl<B: StorageBackend> SettingsStore<B> {
    /// Load the settings, repairing and persisting them when needed.
    pub fn init(backend: B) -> core::result::Result<Self, StorageError> {
        let set = RecordSet::<ProjectSettings, B>::new(DESCRIPTOR, backend)?;
        let loaded = match set.load() {
            Ok(_) => set.find_by_index(0),
            Err(StorageError::Corrupt) => {
                warn!("settings: stored blob corrupt, resetting");
                None
            }
            Err(e) => return Err(e),
        };

        let repaired = match loaded {
            None => {
                info!("settings: initialised with defaults");
                Some(ProjectSettings::default())
            }
            Some(cur) => match cur.validate() {
                Ok(()) => None,
                Err(field) => {
                    warn!("settings: invalid persisted value ({}), using defaults", field);
                    Some(ProjectSettings::default())
                }
            },
        };
        if let Some(settings) = repaired {
            set.update(|items| {
                items.clear();
                items.push(settings);
            })?;
        }
        Ok(Self { set })
    }

    pub fn get(&self) -> ProjectSettings {
        self.set.find_by_index(0).unwrap_or_default()
    }

    /// Validate and persist. Out-of-range values are rejected, not clamped.
    pub fn set(&self, settings: ProjectSettings) -> Result<()> {
        if let Err(field) = settings.validate() {
            warn!("settings: rejected update: {}", field);
            return Err(Error::InvalidArgs);
        }
        self.set.upsert(settings)?;
        info!("settings: saved");
        Ok(())
    }

    pub fn defaults() -> ProjectSettings {
        ProjectSettings::default()
    }
}

// ── Tests ────────────────────────────────────────────────────
