//! Persistent device inventory.
//!
//! Backed by a [`RecordSet`] (key `devices`, namespace `gw`). Doubles as the
//! [`DeviceRegistry`] the link feeds snapshots into: BEGIN marks every known
//! device stale, DEVICE records clear the mark, END removes whatever is
//! still stale.

use core::cell::RefCell;
use core::fmt::Write;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Vec;
use log::{debug, info};

use crate::app::model::{
    DeviceInfo, DeviceName, DeviceUid, EndpointInfo, MAX_CLUSTERS, truncated,
};
use crate::app::ports::{DeviceRegistry, StorageError};
use crate::proto::payload::{get_text, get_u16, get_u64, put_text, put_u16, put_u64};
use crate::storage::{Descriptor, FixedRecord, RecordSet, StorageBackend};

pub const MAX_DEVICES: usize = 64;
pub const MAX_ENDPOINTS: usize = 4;

pub const DESCRIPTOR: Descriptor = Descriptor {
    key: "devices",
    namespace: "gw",
    item_size: DeviceRecord::SIZE,
    max_items: MAX_DEVICES,
    magic: 0x4445_5653, // "DEVS"
    version: 1,
};

const FLAG_ONOFF: u8 = 0x01;
const FLAG_BUTTON: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredEndpoint {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub in_clusters: Vec<u16, MAX_CLUSTERS>,
    pub out_clusters: Vec<u16, MAX_CLUSTERS>,
}

impl From<&EndpointInfo> for StoredEndpoint {
    fn from(ep: &EndpointInfo) -> Self {
        Self {
            endpoint: ep.endpoint,
            profile_id: ep.profile_id,
            device_id: ep.device_id,
            in_clusters: ep.in_clusters.clone(),
            out_clusters: ep.out_clusters.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceRecord {
    pub uid: DeviceUid,
    pub short_addr: u16,
    pub name: DeviceName,
    pub last_seen_ms: u64,
    pub has_onoff: bool,
    pub has_button: bool,
    pub endpoints: Vec<StoredEndpoint, MAX_ENDPOINTS>,
}

impl From<&DeviceInfo> for DeviceRecord {
    fn from(d: &DeviceInfo) -> Self {
        Self {
            uid: d.uid.clone(),
            short_addr: d.short_addr,
            name: d.name.clone(),
            last_seen_ms: d.last_seen_ms,
            has_onoff: d.has_onoff,
            has_button: d.has_button,
            endpoints: Vec::new(),
        }
    }
}

impl DeviceRecord {
    pub fn new(uid: &str, short_addr: u16) -> Self {
        Self {
            uid: truncated(uid),
            short_addr,
            ..Self::default()
        }
    }

    pub fn endpoint(&self, endpoint: u8) -> Option<&StoredEndpoint> {
        self.endpoints.iter().find(|e| e.endpoint == endpoint)
    }

    fn default_prefix(&self) -> &'static str {
        if self.has_button {
            "switch"
        } else if self.has_onoff {
            "relay"
        } else {
            "device"
        }
    }
}

// uid[19] @0, short u16 @19, name[32] @21, last_seen u64 @53, flags u8 @61,
// ep_count u8 @62, endpoints @63 (39 bytes each).
const EP_BASE: usize = 63;
const EP_SIZE: usize = 39;

impl FixedRecord for DeviceRecord {
    const SIZE: usize = EP_BASE + MAX_ENDPOINTS * EP_SIZE;

    fn key(&self) -> &str {
        &self.uid
    }

    fn encode(&self, out: &mut [u8]) {
        put_text(out, 0, 19, &self.uid);
        put_u16(out, 19, self.short_addr);
        put_text(out, 21, 32, &self.name);
        put_u64(out, 53, self.last_seen_ms);
        let mut flags = 0;
        if self.has_onoff {
            flags |= FLAG_ONOFF;
        }
        if self.has_button {
            flags |= FLAG_BUTTON;
        }
        out[61] = flags;
        out[62] = self.endpoints.len() as u8;
        for (i, ep) in self.endpoints.iter().enumerate() {
            let b = EP_BASE + i * EP_SIZE;
            out[b] = ep.endpoint;
            put_u16(out, b + 1, ep.profile_id);
            put_u16(out, b + 3, ep.device_id);
            out[b + 5] = ep.in_clusters.len() as u8;
            out[b + 6] = ep.out_clusters.len() as u8;
            for (j, c) in ep.in_clusters.iter().enumerate() {
                put_u16(out, b + 7 + j * 2, *c);
            }
            for (j, c) in ep.out_clusters.iter().enumerate() {
                put_u16(out, b + 23 + j * 2, *c);
            }
        }
    }

    fn decode(raw: &[u8]) -> Result<Self, StorageError> {
        let ep_count = usize::from(raw[62]);
        if ep_count > MAX_ENDPOINTS {
            return Err(StorageError::Corrupt);
        }
        let mut endpoints = Vec::new();
        for i in 0..ep_count {
            let b = EP_BASE + i * EP_SIZE;
            let n_in = usize::from(raw[b + 5]);
            let n_out = usize::from(raw[b + 6]);
            if n_in > MAX_CLUSTERS || n_out > MAX_CLUSTERS {
                return Err(StorageError::Corrupt);
            }
            let ep = StoredEndpoint {
                endpoint: raw[b],
                profile_id: get_u16(raw, b + 1),
                device_id: get_u16(raw, b + 3),
                in_clusters: (0..n_in).map(|j| get_u16(raw, b + 7 + j * 2)).collect(),
                out_clusters: (0..n_out).map(|j| get_u16(raw, b + 23 + j * 2)).collect(),
            };
            // `ep_count <= MAX_ENDPOINTS` was checked above.
            let _ = endpoints.push(ep);
        }
        let uid: DeviceUid = get_text(raw, 0, 19);
        if uid.is_empty() {
            return Err(StorageError::Corrupt);
        }
        Ok(Self {
            uid,
            short_addr: get_u16(raw, 19),
            name: get_text(raw, 21, 32),
            last_seen_ms: get_u64(raw, 53),
            has_onoff: raw[61] & FLAG_ONOFF != 0,
            has_button: raw[61] & FLAG_BUTTON != 0,
            endpoints,
        })
    }
}

/// Next free `<prefix>N` among `existing`.
fn default_name(prefix: &str, existing: &[DeviceRecord]) -> DeviceName {
    let highest = existing
        .iter()
        .filter_map(|d| d.name.strip_prefix(prefix)?.parse::<u32>().ok())
        .filter(|n| (1..=999).contains(n))
        .max()
        .unwrap_or(0);
    let mut name: DeviceName = truncated(prefix);
    let _ = write!(name, "{}", highest + 1);
    name
}

pub struct DeviceStore<B> {
    set: RecordSet<DeviceRecord, B>,
    /// Devices not yet seen in the running snapshot; `None` outside one.
    stale: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<std::vec::Vec<DeviceUid>>>>,
}

impl<B: StorageBackend> DeviceStore<B> {
    pub fn init(backend: B) -> Result<Self, StorageError> {
        let set = RecordSet::init(DESCRIPTOR, backend)?;
        info!("devices: {} stored", set.count());
        Ok(Self {
            set,
            stale: BlockingMutex::new(RefCell::new(None)),
        })
    }

    /// Insert or update by uid.
    ///
    /// An update with an empty name keeps the stored name; one without
    /// endpoints keeps the stored endpoints. Nameless devices get the next
    /// free `switchN`, `relayN` or `deviceN`.
    pub fn upsert(&self, device: DeviceRecord) -> Result<(), StorageError> {
        self.put(device, true)
    }

    fn put(&self, mut device: DeviceRecord, keep_endpoints: bool) -> Result<(), StorageError> {
        if device.uid.is_empty() {
            return Err(StorageError::NotFound);
        }
        self.set.try_update(|items| {
            let idx = items.iter().position(|d| d.uid == device.uid);
            match idx {
                Some(i) => {
                    if device.name.is_empty() {
                        device.name = items[i].name.clone();
                    }
                    if keep_endpoints && device.endpoints.is_empty() {
                        device.endpoints = items[i].endpoints.clone();
                    }
                }
                None if items.len() >= MAX_DEVICES => return Err(StorageError::Full),
                None => {}
            }
            if device.name.is_empty() {
                device.name = default_name(device.default_prefix(), items);
                debug!("devices: {} named {}", device.uid, device.name);
            }
            match idx {
                Some(i) => items[i] = device,
                None => items.push(device),
            }
            Ok(())
        })
    }

    pub fn get(&self, uid: &str) -> Option<DeviceRecord> {
        self.set.get(uid)
    }

    pub fn get_by_short(&self, short_addr: u16) -> Option<DeviceRecord> {
        self.set
            .with_items(|items| items.iter().find(|d| d.short_addr == short_addr).cloned())
    }

    pub fn remove(&self, uid: &str) -> Result<(), StorageError> {
        self.set.remove(uid)
    }

    pub fn set_name(&self, uid: &str, name: &str) -> Result<(), StorageError> {
        self.set.try_update(|items| {
            let d = items
                .iter_mut()
                .find(|d| d.uid.as_str() == uid)
                .ok_or(StorageError::NotFound)?;
            d.name = truncated(name);
            Ok(())
        })
    }

    /// Merge an endpoint into its device, creating a bare device record if
    /// the endpoint arrives first.
    pub fn merge_endpoint(&self, ep: &EndpointInfo) -> Result<(), StorageError> {
        if ep.uid.is_empty() || ep.endpoint == 0 {
            return Err(StorageError::NotFound);
        }
        self.set.try_update(|items| {
            let idx = match items.iter().position(|d| d.uid == ep.uid) {
                Some(i) => i,
                None => {
                    if items.len() >= MAX_DEVICES {
                        return Err(StorageError::Full);
                    }
                    let mut d = DeviceRecord::new(&ep.uid, ep.short_addr);
                    d.name = default_name(d.default_prefix(), items);
                    items.push(d);
                    items.len() - 1
                }
            };
            let device = &mut items[idx];
            let stored = StoredEndpoint::from(ep);
            if let Some(slot) = device.endpoints.iter_mut().find(|e| e.endpoint == ep.endpoint) {
                *slot = stored;
                Ok(())
            } else {
                device.endpoints.push(stored).map_err(|_| StorageError::Full)
            }
        })
    }

    pub fn list(&self) -> std::vec::Vec<DeviceRecord> {
        self.set.list()
    }

    pub fn count(&self) -> usize {
        self.set.count()
    }

    fn is_snapshot_active(&self) -> bool {
        self.stale.lock(|s| s.borrow().is_some())
    }

    fn unmark(&self, uid: &str) {
        self.stale.lock(|s| {
            if let Some(stale) = s.borrow_mut().as_mut() {
                stale.retain(|u| u.as_str() != uid);
            }
        });
    }
}

impl<B: StorageBackend> DeviceRegistry for DeviceStore<B> {
    fn snapshot_begin(&self, total: u16) -> crate::Result<()> {
        let known: std::vec::Vec<DeviceUid> =
            self.set.with_items(|items| items.iter().map(|d| d.uid.clone()).collect());
        info!(
            "devices: snapshot begin total={} stale candidates={}",
            total,
            known.len()
        );
        self.stale.lock(|s| *s.borrow_mut() = Some(known));
        Ok(())
    }

    fn upsert_device(&self, device: &DeviceInfo) -> crate::Result<()> {
        if device.uid.is_empty() {
            return Err(crate::Error::InvalidArgs);
        }
        // Inside a snapshot the endpoints are rebuilt from the ENDPOINT
        // records that follow.
        let in_snapshot = self.is_snapshot_active();
        if in_snapshot {
            self.unmark(&device.uid);
        }
        self.put(DeviceRecord::from(device), !in_snapshot)?;
        Ok(())
    }

    fn upsert_endpoint(&self, endpoint: &EndpointInfo) -> crate::Result<()> {
        if endpoint.uid.is_empty() || endpoint.endpoint == 0 {
            return Err(crate::Error::InvalidArgs);
        }
        self.merge_endpoint(endpoint)?;
        Ok(())
    }

    fn remove_device(&self, uid: &str) -> crate::Result<()> {
        self.unmark(uid);
        self.remove(uid)?;
        Ok(())
    }

    fn snapshot_end(&self) -> crate::Result<()> {
        let Some(stale) = self.stale.lock(|s| s.borrow_mut().take()) else {
            return Ok(());
        };
        if !stale.is_empty() {
            self.set
                .update(|items| items.retain(|d| !stale.contains(&d.uid)))?;
        }
        info!("devices: snapshot end, swept {} stale", stale.len());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::nvs::NvsAdapter;
    use crate::storage::KvBackend;

    fn store() -> DeviceStore<KvBackend<NvsAdapter>> {
        DeviceStore::init(KvBackend::new(NvsAdapter::new().unwrap())).unwrap()
    }

    fn info(uid: &str, onoff: bool, button: bool) -> DeviceInfo {
        DeviceInfo {
            uid: truncated(uid),
            short_addr: 0x1000,
            has_onoff: onoff,
            has_button: button,
            ..DeviceInfo::default()
        }
    }

    fn endpoint(uid: &str, ep: u8) -> EndpointInfo {
        EndpointInfo {
            uid: truncated(uid),
            endpoint: ep,
            profile_id: 0x0104,
            device_id: 0x0100,
            in_clusters: Vec::from_slice(&[0x0000, 0x0006]).unwrap(),
            ..EndpointInfo::default()
        }
    }

    #[test]
    fn record_round_trips_through_fixed_layout() {
        let mut d = DeviceRecord::new("0x00124b0001", 0x1234);
        d.name = truncated("Hall switch");
        d.last_seen_ms = 99;
        d.has_button = true;
        d.endpoints.push(StoredEndpoint::from(&endpoint("0x00124b0001", 1))).unwrap();
        let mut raw = [0u8; DeviceRecord::SIZE];
        d.encode(&mut raw);
        assert_eq!(DeviceRecord::decode(&raw).unwrap(), d);
    }

    #[test]
    fn default_names_follow_capabilities() {
        let s = store();
        s.upsert_device(&info("a", false, true)).unwrap();
        s.upsert_device(&info("b", false, true)).unwrap();
        s.upsert_device(&info("c", true, false)).unwrap();
        s.upsert_device(&info("d", false, false)).unwrap();
        assert_eq!(s.get("a").unwrap().name.as_str(), "switch1");
        assert_eq!(s.get("b").unwrap().name.as_str(), "switch2");
        assert_eq!(s.get("c").unwrap().name.as_str(), "relay1");
        assert_eq!(s.get("d").unwrap().name.as_str(), "device1");
    }

    #[test]
    fn update_without_name_keeps_existing_name() {
        let s = store();
        s.upsert_device(&info("a", true, false)).unwrap();
        s.set_name("a", "Kitchen").unwrap();
        s.upsert_device(&info("a", true, false)).unwrap();
        assert_eq!(s.get("a").unwrap().name.as_str(), "Kitchen");
        assert_eq!(s.set_name("zz", "x"), Err(StorageError::NotFound));
    }

    #[test]
    fn endpoints_merge_into_device() {
        let s = store();
        s.upsert_device(&info("a", true, false)).unwrap();
        s.merge_endpoint(&endpoint("a", 1)).unwrap();
        s.merge_endpoint(&endpoint("a", 2)).unwrap();
        s.merge_endpoint(&endpoint("a", 1)).unwrap();
        let d = s.get("a").unwrap();
        assert_eq!(d.endpoints.len(), 2);
        assert_eq!(d.endpoint(1).unwrap().in_clusters.as_slice(), &[0x0000, 0x0006]);

        // Outside a snapshot a plain device update keeps the endpoints.
        s.upsert_device(&info("a", true, false)).unwrap();
        assert_eq!(s.get("a").unwrap().endpoints.len(), 2);
    }

    #[test]
    fn snapshot_sweeps_devices_not_reported() {
        let s = store();
        for uid in ["a", "b", "c"] {
            s.upsert_device(&info(uid, false, false)).unwrap();
        }
        s.snapshot_begin(2).unwrap();
        s.upsert_device(&info("a", false, false)).unwrap();
        s.upsert_device(&info("c", false, false)).unwrap();
        s.snapshot_end().unwrap();

        let uids: std::vec::Vec<_> = s.list().into_iter().map(|d| d.uid).collect();
        assert_eq!(uids, vec![truncated::<18>("a"), truncated("c")]);
    }

    #[test]
    fn snapshot_rebuilds_endpoints() {
        let s = store();
        s.upsert_device(&info("a", true, false)).unwrap();
        s.upsert_endpoint(&endpoint("a", 1)).unwrap();
        s.upsert_endpoint(&endpoint("a", 2)).unwrap();

        s.snapshot_begin(1).unwrap();
        s.upsert_device(&info("a", true, false)).unwrap();
        assert!(s.get("a").unwrap().endpoints.is_empty());
        s.upsert_endpoint(&endpoint("a", 2)).unwrap();
        s.snapshot_end().unwrap();

        let d = s.get("a").unwrap();
        assert_eq!(d.endpoints.len(), 1);
        assert_eq!(d.endpoints[0].endpoint, 2);
    }

    #[test]
    fn endpoint_zero_and_empty_uid_are_rejected() {
        let s = store();
        assert_eq!(s.upsert_endpoint(&endpoint("a", 0)), Err(crate::Error::InvalidArgs));
        assert_eq!(s.upsert_endpoint(&endpoint("", 1)), Err(crate::Error::InvalidArgs));
        assert_eq!(s.count(), 0);
    }

    #[test]
    fn endpoint_before_device_creates_bare_record() {
        let s = store();
        s.upsert_endpoint(&endpoint("z", 1)).unwrap();
        let d = s.get("z").unwrap();
        assert_eq!(d.name.as_str(), "device1");
        assert_eq!(d.endpoints.len(), 1);
    }

    #[test]
    fn snapshot_end_without_begin_is_a_no_op() {
        let s = store();
        s.upsert_device(&info("a", false, false)).unwrap();
        s.snapshot_end().unwrap();
        assert_eq!(s.count(), 1);
    }

    #[test]
    fn lookup_by_short_address() {
        let s = store();
        let mut d = info("a", false, false);
        d.short_addr = 0xBEEF;
        s.upsert_device(&d).unwrap();
        assert_eq!(s.get_by_short(0xBEEF).unwrap().uid.as_str(), "a");
        assert!(s.get_by_short(0x0001).is_none());
    }

    #[test]
    fn store_survives_reload() {
        let nvs = NvsAdapter::new().unwrap();
        {
            let s = DeviceStore::init(KvBackend::new(nvs.clone())).unwrap();
            s.upsert_device(&info("a", true, false)).unwrap();
        }
        let s = DeviceStore::init(KvBackend::new(nvs)).unwrap();
        assert_eq!(s.get("a").unwrap().name.as_str(), "relay1");
    }
}
