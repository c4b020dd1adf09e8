//! Inbound frame routing.
//!
//! The dispatcher runs on the I/O thread and sees every decoded frame in
//! arrival order. It never writes to the transport itself: anything that
//! needs an outbound frame is returned as an [`Action`] for the I/O task
//! to perform, which keeps this module synchronous and testable.

use std::sync::Arc;

use embassy_time::Instant;
use heapless::Vec;
use log::{debug, info, warn};

use crate::app::events::LinkEvent;
use crate::app::ports::{DeviceBlobSink, DeviceRegistry, EventSink};
use crate::config::LinkConfig;
use crate::link::correlator::Correlator;
use crate::link::device_blob::{BlobOutcome, DeviceBlobAssembler};
use crate::link::snapshot::{SnapshotOutcome, SnapshotReassembler};
use crate::link::stall::StallPolicy;
use crate::proto::{
    CommandId, CommandResponse, DeviceBlobChunk, EventRecord, Frame, MessageType, SnapshotRecord,
    WirePayload,
};

/// Follow-up work requested by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Send an empty frame of `kind` echoing `seq` (PONG, HELLO_ACK).
    Reply { kind: MessageType, seq: u16 },
    /// Fire-and-forget command with no arguments.
    SyncDetached(CommandId),
    /// Wake the snapshot resync task.
    Resync,
    /// A snapshot BEGIN arrived; stops an in-progress resync round.
    SnapshotBegun,
    /// A complete snapshot landed; fetch the device blob that matches it.
    RefreshDeviceBlob,
    /// The peer answered a handshake or keepalive.
    PeerAlive,
}

pub type Actions = Vec<Action, 4>;

/// Application collaborators the link publishes into.
pub struct Collaborators {
    pub events: Box<dyn EventSink + Send>,
    pub registry: Arc<dyn DeviceRegistry + Send + Sync>,
    pub device_blob: Box<dyn DeviceBlobSink + Send>,
}

pub struct Dispatcher {
    snapshot: SnapshotReassembler,
    blob: DeviceBlobAssembler,
    collab: Collaborators,
}

fn push(actions: &mut Actions, action: Action) {
    if actions.push(action).is_err() {
        warn!("dispatch: action queue full, dropping {:?}", action);
    }
}

impl Dispatcher {
    pub fn new(config: &LinkConfig, collab: Collaborators) -> Self {
        let snapshot_policy = StallPolicy::from_millis(
            config.snapshot_idle_timeout_ms,
            config.snapshot_retry_gap_ms,
            config.snapshot_retry_max,
        );
        let blob_policy = StallPolicy::from_millis(
            config.device_blob_idle_timeout_ms,
            config.device_blob_retry_gap_ms,
            config.device_blob_retry_max,
        );
        Self {
            snapshot: SnapshotReassembler::new(snapshot_policy),
            blob: DeviceBlobAssembler::new(config.device_blob_max_len as usize, blob_policy),
            collab,
        }
    }

    pub fn snapshot(&self) -> &SnapshotReassembler {
        &self.snapshot
    }

    /// Route one decoded frame.
    pub fn dispatch(&mut self, frame: &Frame, correlator: &Correlator, now: Instant) -> Actions {
        let mut actions = Actions::new();
        let Some(kind) = frame.kind() else {
            debug!("dispatch: unknown message type 0x{:02X}", frame.msg_type);
            return actions;
        };

        match kind {
            MessageType::Ping => push(
                &mut actions,
                Action::Reply {
                    kind: MessageType::Pong,
                    seq: frame.seq,
                },
            ),
            MessageType::Hello => {
                info!("link: HELLO from peer seq={}", frame.seq);
                push(
                    &mut actions,
                    Action::Reply {
                        kind: MessageType::HelloAck,
                        seq: frame.seq,
                    },
                );
            }
            MessageType::Pong | MessageType::HelloAck => {
                debug!("link: {:?} seq={}", kind, frame.seq);
                push(&mut actions, Action::PeerAlive);
            }
            MessageType::CmdRsp => match CommandResponse::decode(&frame.payload) {
                Ok(rsp) => {
                    correlator.on_response(frame.seq, rsp);
                }
                Err(e) => warn!("dispatch: bad CMD_RSP seq={}: {}", frame.seq, e),
            },
            MessageType::Evt => self.on_event(frame, &mut actions),
            MessageType::Snapshot => self.on_snapshot(frame, now, &mut actions),
            MessageType::DeviceBlobChunk => self.on_blob_chunk(frame, now),
            MessageType::CmdReq => {
                debug!("dispatch: ignoring inbound CMD_REQ seq={}", frame.seq);
            }
        }
        actions
    }

    /// Run the stall watchdogs.
    pub fn poll(&mut self, now: Instant) -> Actions {
        let mut actions = Actions::new();
        if self.snapshot.poll_stall(now) {
            push(&mut actions, Action::SyncDetached(CommandId::SyncSnapshot));
        }
        if self.blob.poll_stall(now) {
            push(&mut actions, Action::SyncDetached(CommandId::SyncDeviceBlob));
        }
        actions
    }

    fn on_event(&mut self, frame: &Frame, actions: &mut Actions) {
        if frame.payload.is_empty() {
            return;
        }
        match EventRecord::decode(&frame.payload) {
            Ok(rec) => {
                let event = LinkEvent::from_record(&rec);
                debug!("event: {} uid={}", event.event_type, event.device_uid);
                self.collab.events.emit(&event);
                if !self.snapshot.has_seen_snapshot() {
                    push(actions, Action::Resync);
                }
            }
            Err(e) => warn!("dispatch: bad EVT seq={}: {}", frame.seq, e),
        }
    }

    fn on_snapshot(&mut self, frame: &Frame, now: Instant, actions: &mut Actions) {
        let rec = match SnapshotRecord::decode(&frame.payload) {
            Ok(rec) => rec,
            Err(e) => {
                warn!("dispatch: bad SNAPSHOT seq={}: {}", frame.seq, e);
                return;
            }
        };
        let outcome = self.snapshot.apply(
            &rec,
            now,
            self.collab.registry.as_ref(),
            self.collab.events.as_mut(),
        );
        match outcome {
            SnapshotOutcome::Begun { .. } => push(actions, Action::SnapshotBegun),
            SnapshotOutcome::Incomplete { .. } => push(actions, Action::Resync),
            SnapshotOutcome::Complete { .. } => push(actions, Action::RefreshDeviceBlob),
            SnapshotOutcome::Applied | SnapshotOutcome::Ignored => {}
        }
    }

    fn on_blob_chunk(&mut self, frame: &Frame, now: Instant) {
        let chunk = match DeviceBlobChunk::decode(&frame.payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("dispatch: bad DEVICE_FB_CHUNK seq={}: {}", frame.seq, e);
                return;
            }
        };
        if let BlobOutcome::Complete(blob) = self.blob.apply(&chunk, now) {
            if let Err(e) = self.collab.device_blob.store(&blob) {
                warn!("device blob: sink rejected {} bytes: {}", blob.len(), e);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
