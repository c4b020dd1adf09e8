//! End-to-end link tests against a fake radio controller.
//!
//! Each test starts a real `Link` (with its I/O thread) on one end of an
//! in-memory pipe and a scripted peer on the other.

use std::time::Duration;

use gwlink::Error;
use gwlink::app::commands::OnOff;
use gwlink::app::events::EventSource;
use gwlink::app::model::truncated;
use gwlink::config::LinkConfig;
use gwlink::link::Link;
use gwlink::link::transport::{PipeEnd, pipe};
use gwlink::proto::{CommandId, EventKind, EventRecord, Frame, MessageType, Status};

use crate::mocks::Harness;
use crate::peer::{FakeRadio, Script, begin, device, end, endpoint, state, wait_until};

const SETTLE: Duration = Duration::from_secs(3);

fn start(script: Script) -> (Link<PipeEnd>, FakeRadio, Harness) {
    start_with(script, LinkConfig::default())
}

fn start_with(script: Script, config: LinkConfig) -> (Link<PipeEnd>, FakeRadio, Harness) {
    let (ours, theirs) = pipe();
    let radio = FakeRadio::spawn(theirs, script);
    let h = Harness::new();
    let link = Link::start(ours, config, h.collaborators()).unwrap();
    (link, radio, h)
}

// ── Startup ──────────────────────────────────────────────────

#[test]
fn initial_snapshot_populates_store_and_fetches_blob() {
    let script = Script {
        snapshot: vec![
            begin(2),
            device("0xA1", true),
            endpoint("0xA1", 1),
            state("0xA1", true),
            device("0xB2", false),
            end(),
        ],
        device_blob: Some((0..400u16).map(|i| i as u8).collect()),
        ..Script::default()
    };
    let (link, radio, h) = start(script);

    assert!(wait_until(SETTLE, || h.store.count() == 2));
    let a1 = h.store.get("0xA1").unwrap();
    assert_eq!(a1.name.as_str(), "relay1");
    assert_eq!(a1.endpoints.len(), 1);
    assert_eq!(h.store.get("0xB2").unwrap().name.as_str(), "device1");

    let states: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter(|e| e.source == EventSource::Snapshot)
        .collect();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].event_type.as_str(), "zigbee.attr_report");

    // The complete snapshot is followed by a device blob request.
    assert!(wait_until(SETTLE, || h.blobs.blobs().len() == 1));
    assert_eq!(h.blobs.blobs()[0].len(), 400);
    assert_eq!(radio.count(CommandId::SyncSnapshot), 1);
    assert_eq!(radio.count(CommandId::SyncDeviceBlob), 1);

    assert!(wait_until(SETTLE, || link.is_peer_alive()));
}

#[test]
fn second_snapshot_sweeps_devices_the_peer_forgot() {
    let script = Script {
        snapshot: vec![begin(1), device("0xA1", true), end()],
        ..Script::default()
    };
    let (link, _radio, h) = start(script);
    assert!(wait_until(SETTLE, || h.store.count() == 1));

    // A device the radio no longer reports.
    h.store
        .upsert(gwlink::stores::DeviceRecord::new("0xDEAD", 0x1111))
        .unwrap();
    assert_eq!(h.store.count(), 2);

    link.sync_snapshot().unwrap();
    assert!(wait_until(SETTLE, || h.store.count() == 1));
    assert!(h.store.get("0xDEAD").is_none());
}

// ── Commands ─────────────────────────────────────────────────

#[test]
fn typed_commands_carry_sequence_as_request_id() {
    let (link, radio, _h) = start(Script::default());

    link.on_off("0x00124b0001", 1, OnOff::On).unwrap();
    link.level("0x00124b0001", 1, 128, 500).unwrap();
    link.permit_join(60).unwrap();

    let reqs = radio.requests();
    for (seq, req) in &reqs {
        assert_eq!(req.req_id, u32::from(*seq));
    }
    let on_off = reqs.iter().find(|(_, r)| r.cmd == CommandId::OnOff).unwrap();
    assert_eq!(on_off.1.device_uid.as_str(), "0x00124b0001");
    assert_eq!(on_off.1.params[0], 1);
    let level = reqs.iter().find(|(_, r)| r.cmd == CommandId::Level).unwrap();
    assert_eq!(level.1.params, [128, 5, 0]);

    // Sequence numbers strictly increase across calls.
    let seqs: Vec<u16> = reqs.iter().map(|(s, _)| *s).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn peer_status_maps_to_error() {
    let script = Script::default()
        .with_status(CommandId::RemoveDevice, Status::NotFound)
        .with_status(CommandId::Identify, Status::Unsupported);
    let (link, _radio, _h) = start(script);

    assert_eq!(link.remove_device("0xA1").unwrap_err(), Error::NotFound);
    assert_eq!(link.identify("0xA1", 1, 5).unwrap_err(), Error::Unsupported);
    assert!(link.net_services_start().is_ok());
}

#[test]
fn invalid_arguments_never_reach_the_wire() {
    let script = Script {
        snapshot: vec![begin(0), end()],
        ..Script::default()
    };
    let (link, radio, _h) = start(script);
    let before = radio.requests().len();
    assert_eq!(link.level("0xA1", 1, 255, 0).unwrap_err(), Error::InvalidArgs);
    assert_eq!(link.on_off("", 1, OnOff::Toggle).unwrap_err(), Error::InvalidArgs);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(radio.requests().len(), before);
}

#[test]
fn silent_peer_times_out() {
    let script = Script {
        mute: true,
        ..Script::default()
    };
    let (link, _radio, _h) = start(script);
    assert_eq!(link.permit_join(10).unwrap_err(), Error::Timeout);
    assert!(!link.is_peer_alive());
}

// ── Events ───────────────────────────────────────────────────

#[test]
fn events_are_published_with_normalised_types() {
    let script = Script {
        snapshot: vec![begin(0), end()],
        ..Script::default()
    };
    let (_link, mut radio, h) = start(script);

    radio.publish(&EventRecord {
        event_id: 1,
        evt_id: EventKind::AttrReport.code(),
        event_type: truncated("zigbee_attr_report"),
        device_uid: truncated("0xA1"),
        cluster_id: 0x0006,
        ..EventRecord::default()
    });
    // Garbage between frames is skipped.
    radio.inject(&[0x00, 0xA5, 0x13, 0x37, 0xFF]);
    radio.publish(&EventRecord {
        event_id: 2,
        evt_id: EventKind::Command.code(),
        cluster_id: 0x0006,
        ..EventRecord::default()
    });

    assert!(wait_until(SETTLE, || {
        h.events
            .events()
            .iter()
            .filter(|e| e.source == EventSource::Radio)
            .count()
            == 2
    }));
    let radio_events: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter(|e| e.source == EventSource::Radio)
        .collect();
    assert_eq!(radio_events[0].event_type.as_str(), "zigbee.attr_report");
    assert_eq!(radio_events[1].event_type.as_str(), "zigbee.command");
    assert_eq!(radio_events[1].cmd.as_str(), "toggle");
}

#[test]
fn corrupted_frame_is_dropped_and_stream_recovers() {
    let script = Script {
        snapshot: vec![begin(0), end()],
        ..Script::default()
    };
    let (_link, mut radio, h) = start(script);

    let rec = EventRecord {
        evt_id: EventKind::DeviceJoin.code(),
        ..EventRecord::default()
    };
    let mut bad = Frame::new(MessageType::Evt, 9, &gwlink::proto::WirePayload::encode(&rec).unwrap())
        .unwrap()
        .to_bytes()
        .unwrap();
    let last = bad.len() - 1;
    bad[last] ^= 0xFF;
    radio.inject(&bad);
    radio.publish(&rec);

    assert!(wait_until(SETTLE, || {
        h.events.events().iter().any(|e| e.event_type.as_str() == "device.join")
    }));
    std::thread::sleep(Duration::from_millis(100));
    let joins = h
        .events
        .events()
        .iter()
        .filter(|e| e.event_type.as_str() == "device.join")
        .count();
    assert_eq!(joins, 1);
}

// ── Resync ───────────────────────────────────────────────────

#[test]
fn incomplete_snapshot_is_requested_again() {
    let script = Script {
        // Announces three devices but only ever sends one.
        snapshot: vec![begin(3), device("0xA1", true), end()],
        ..Script::default()
    };
    let (_link, radio, _h) = start(script);
    assert!(wait_until(SETTLE, || radio.count(CommandId::SyncSnapshot) >= 2));
}

#[test]
fn lost_begin_after_acknowledged_request_is_recovered() {
    let script = Script {
        // The request is acknowledged but BEGIN never makes it across.
        snapshot: vec![device("0xA1", true), end()],
        ..Script::default()
    };
    let (_link, radio, _h) = start(script);
    assert!(wait_until(SETTLE, || radio.count(CommandId::SyncSnapshot) >= 2));
}

#[test]
fn delivered_begin_needs_no_second_request() {
    let script = Script {
        snapshot: vec![begin(1), device("0xA1", true), end()],
        ..Script::default()
    };
    let cfg = LinkConfig {
        resync_backoff_ms: 200,
        ..LinkConfig::default()
    };
    let (_link, radio, h) = start_with(script, cfg);
    assert!(wait_until(SETTLE, || h.store.count() == 1));
    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(radio.count(CommandId::SyncSnapshot), 1);
}

#[test]
fn resync_gives_up_after_configured_rounds() {
    let script = Script::default().with_status(CommandId::SyncSnapshot, Status::Busy);
    let cfg = LinkConfig {
        resync_rounds: 3,
        resync_backoff_ms: 100,
        ..LinkConfig::default()
    };
    let (_link, radio, _h) = start_with(script, cfg);

    // The initial request plus one per round.
    assert!(wait_until(SETTLE, || radio.count(CommandId::SyncSnapshot) == 4));
    std::thread::sleep(Duration::from_millis(800));
    assert_eq!(radio.count(CommandId::SyncSnapshot), 4);
}

#[test]
fn shutdown_is_idempotent() {
    let (mut link, _radio, _h) = start(Script::default());
    link.shutdown();
    link.shutdown();
}
