//! Snapshot reassembly.
//!
//! A snapshot is an ordered stream of records:
//!
//! ```text
//! BEGIN(total) → { DEVICE | ENDPOINT | STATE | REMOVE }* → END
//! ```
//!
//! Records are applied to the [`DeviceRegistry`] as they arrive. On END the
//! number of DEVICE records is checked against the announced total; a short
//! stream is reported as [`SnapshotOutcome::Incomplete`] so the link can
//! schedule a re-request. A stream whose END never arrives is caught by the
//! stall watchdog.

use embassy_time::Instant;
use log::{debug, info, warn};

use crate::app::events::LinkEvent;
use crate::app::ports::{DeviceRegistry, EventSink};
use crate::link::stall::{StallPolicy, StallWatch};
use crate::proto::{SnapshotKind, SnapshotRecord};

/// What applying one record did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Record had no effect on the session (unknown kind, END without BEGIN).
    Ignored,
    /// A new session started.
    Begun { total: u16 },
    /// A record inside a session.
    Applied,
    /// END with every announced device received.
    Complete { received: u16 },
    /// END with devices missing.
    Incomplete { expected: u16, received: u16 },
}

pub struct SnapshotReassembler {
    active: bool,
    seen: bool,
    expected: u16,
    received: u16,
    watch: StallWatch,
}

impl SnapshotReassembler {
    pub fn new(policy: StallPolicy) -> Self {
        Self {
            active: false,
            seen: false,
            expected: 0,
            received: 0,
            watch: StallWatch::new(policy),
        }
    }

    /// Whether a session is open.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether any snapshot has ever begun on this link.
    pub fn has_seen_snapshot(&self) -> bool {
        self.seen
    }

    /// `(received, expected)` for the current or last session.
    pub fn progress(&self) -> (u16, u16) {
        (self.received, self.expected)
    }

    pub fn apply(
        &mut self,
        rec: &SnapshotRecord,
        now: Instant,
        registry: &dyn DeviceRegistry,
        events: &mut dyn EventSink,
    ) -> SnapshotOutcome {
        let Some(kind) = rec.kind() else {
            debug!("snapshot: ignoring record kind {}", rec.kind);
            return SnapshotOutcome::Ignored;
        };
        self.watch.touch(now);

        match kind {
            SnapshotKind::Begin => {
                if self.active {
                    warn!(
                        "snapshot: BEGIN while active ({}/{}), restarting",
                        self.received, self.expected
                    );
                }
                self.active = true;
                self.seen = true;
                self.expected = rec.total_devices;
                self.received = 0;
                self.watch.start(now);
                if let Err(e) = registry.snapshot_begin(rec.total_devices) {
                    warn!("snapshot: registry begin failed: {}", e);
                }
                info!("snapshot: begin total_devices={}", rec.total_devices);
                SnapshotOutcome::Begun {
                    total: rec.total_devices,
                }
            }
            SnapshotKind::Device => {
                if let Err(e) = registry.upsert_device(&rec.device()) {
                    warn!("snapshot: upsert {} failed: {}", rec.device_uid, e);
                }
                self.received = self.received.saturating_add(1);
                SnapshotOutcome::Applied
            }
            SnapshotKind::Endpoint => {
                if let Err(e) = registry.upsert_endpoint(&rec.endpoint_info()) {
                    warn!(
                        "snapshot: endpoint {}/{} failed: {}",
                        rec.device_uid, rec.endpoint, e
                    );
                }
                SnapshotOutcome::Applied
            }
            SnapshotKind::State => {
                events.emit(&LinkEvent::from_snapshot_state(rec));
                SnapshotOutcome::Applied
            }
            SnapshotKind::Remove => {
                if let Err(e) = registry.remove_device(&rec.device_uid) {
                    debug!("snapshot: remove {} failed: {}", rec.device_uid, e);
                }
                SnapshotOutcome::Applied
            }
            SnapshotKind::End => {
                if !self.active {
                    debug!("snapshot: END without BEGIN, ignored");
                    return SnapshotOutcome::Ignored;
                }
                self.active = false;
                self.watch.stop();
                if let Err(e) = registry.snapshot_end() {
                    warn!("snapshot: registry end failed: {}", e);
                }
                info!(
                    "snapshot: end expected={} received={}",
                    self.expected, self.received
                );
                if self.expected > 0 && self.received < self.expected {
                    warn!("snapshot: incomplete, requesting re-sync");
                    SnapshotOutcome::Incomplete {
                        expected: self.expected,
                        received: self.received,
                    }
                } else {
                    SnapshotOutcome::Complete {
                        received: self.received,
                    }
                }
            }
        }
    }

    /// Returns `true` if the open session has stalled and should be
    /// re-requested now.
    pub fn poll_stall(&mut self, now: Instant) -> bool {
        if !self.active {
            return false;
        }
        let due = self.watch.poll(now);
        if due {
            warn!(
                "snapshot stalled: received={}/{} retry={}",
                self.received,
                self.expected,
                self.watch.retries()
            );
        }
        due
    }
}

// ── Tests ────────────────────────────────────────────────────
