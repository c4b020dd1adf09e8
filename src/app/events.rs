//! Events published by the link.
//!
//! Radio-side `EVT` frames and snapshot `STATE` records both surface here
//! as a [`LinkEvent`] delivered through the [`EventSink`](super::ports::EventSink)
//! port. Event type strings are normalised so application code sees one
//! dotted naming scheme regardless of peer firmware revision.

use heapless::String;

use crate::app::model::{DeviceUid, Value, truncated};
use crate::proto::payload::{EventRecord, SnapshotRecord};
use crate::proto::types::EventKind;

pub type EventType = String<31>;
pub type CommandName = String<15>;

/// On/Off cluster; command events on it default to `toggle`.
pub const CLUSTER_ON_OFF: u16 = 0x0006;

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// Live `EVT` frame.
    Radio,
    /// Attribute state replayed inside a snapshot.
    Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub source: EventSource,
    pub event_type: EventType,
    pub ts_ms: u64,
    pub device_uid: DeviceUid,
    pub short_addr: u16,
    pub endpoint: u8,
    pub cmd: CommandName,
    pub cluster_id: u16,
    pub attr_id: u16,
    pub value: Value,
}

impl LinkEvent {
    pub fn from_record(rec: &EventRecord) -> Self {
        let kind = EventKind::from_code(rec.evt_id);
        let mut cmd = rec.cmd.clone();
        if kind == Some(EventKind::Command) && rec.cluster_id == CLUSTER_ON_OFF && cmd.is_empty() {
            cmd = truncated("toggle");
        }
        Self {
            source: EventSource::Radio,
            event_type: normalize_event_type(&rec.event_type, kind),
            ts_ms: rec.ts_ms,
            device_uid: rec.device_uid.clone(),
            short_addr: rec.short_addr,
            endpoint: rec.endpoint,
            cmd,
            cluster_id: rec.cluster_id,
            attr_id: rec.attr_id,
            value: rec.value.clone(),
        }
    }

    /// Attribute state carried by a snapshot `STATE` record, published as
    /// an ordinary attribute report.
    pub fn from_snapshot_state(rec: &SnapshotRecord) -> Self {
        Self {
            source: EventSource::Snapshot,
            event_type: truncated("zigbee.attr_report"),
            ts_ms: rec.state_ts_ms,
            device_uid: rec.device_uid.clone(),
            short_addr: rec.short_addr,
            endpoint: rec.endpoint,
            cmd: CommandName::new(),
            cluster_id: rec.state_cluster_id,
            attr_id: rec.state_attr_id,
            value: rec.state_value.clone(),
        }
    }
}

/// `zigbee_foo` becomes `zigbee.foo`; an empty type is derived from the
/// event id.
pub fn normalize_event_type(raw: &str, kind: Option<EventKind>) -> EventType {
    if let Some(rest) = raw.strip_prefix("zigbee_") {
        let mut out: EventType = truncated("zigbee.");
        // 31 - len("zigbee.") leaves 24 bytes for the suffix.
        let _ = out.push_str(truncated::<24>(rest).as_str());
        return out;
    }
    if !raw.is_empty() {
        return truncated(raw);
    }
    let fallback = match kind {
        Some(EventKind::AttrReport) => "zigbee.attr_report",
        Some(EventKind::Command) => "zigbee.command",
        Some(EventKind::DeviceJoin) => "device.join",
        Some(EventKind::DeviceLeave) => "device.leave",
        _ => "zigbee.net_state",
    };
    truncated(fallback)
}
