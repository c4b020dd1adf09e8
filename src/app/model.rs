//! Domain values shared by the wire payloads, the registry hooks and the stores.

use heapless::{String, Vec};

/// Device identifier, at most 18 bytes (19 with the wire NUL).
pub type DeviceUid = String<18>;

/// Human-readable device name, at most 31 bytes.
pub type DeviceName = String<31>;

/// Short text value carried by events and attribute writes.
pub type ValueText = String<23>;

/// Cluster lists per endpoint are capped at the snapshot record capacity.
pub const MAX_CLUSTERS: usize = 8;

/// Typed attribute or event value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    I64(i64),
    F32(f32),
    Text(ValueText),
}

impl Value {
    pub fn text(s: &str) -> Self {
        Self::Text(truncated(s))
    }
}

/// Device as reported by a snapshot DEVICE record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceInfo {
    pub uid: DeviceUid,
    pub short_addr: u16,
    pub name: DeviceName,
    pub last_seen_ms: u64,
    pub has_onoff: bool,
    pub has_button: bool,
}

/// Endpoint descriptor as reported by a snapshot ENDPOINT record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EndpointInfo {
    pub uid: DeviceUid,
    pub short_addr: u16,
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub in_clusters: Vec<u16, MAX_CLUSTERS>,
    pub out_clusters: Vec<u16, MAX_CLUSTERS>,
}

/// Copy `s` into a fixed-capacity string, cutting at the last char
/// boundary that fits.
pub fn truncated<const N: usize>(s: &str) -> String<N> {
    let mut end = s.len().min(N);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::new();
    // `end <= N` and lies on a char boundary, so the push cannot fail.
    let _ = out.push_str(&s[..end]);
    out
}
