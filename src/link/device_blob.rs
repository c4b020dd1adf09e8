//! Device blob transfer reassembly (`DEVICE_FB_CHUNK` frames).
//!
//! The radio side serialises its device inventory into one opaque blob and
//! streams it in chunks of up to 180 bytes. Chunks carry an absolute offset,
//! so they may be applied in any order; the transfer is accepted only if
//! the high-water mark equals the announced length when END arrives.

use embassy_time::Instant;
use log::{debug, info, warn};

use crate::link::stall::{StallPolicy, StallWatch};
use crate::proto::DeviceBlobChunk;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobOutcome {
    /// Chunk dropped (no transfer, wrong transfer id, out of bounds).
    Ignored,
    /// Chunk stored, transfer still open.
    Progress { received: usize, expected: usize },
    /// END with the full blob.
    Complete(Vec<u8>),
    /// END with bytes missing; transfer discarded.
    Incomplete { received: usize, expected: usize },
}

pub struct DeviceBlobAssembler {
    max_len: usize,
    transfer_id: u16,
    expected: usize,
    received: usize,
    buf: Option<Vec<u8>>,
    watch: StallWatch,
}

impl DeviceBlobAssembler {
    pub fn new(max_len: usize, policy: StallPolicy) -> Self {
        Self {
            max_len,
            transfer_id: 0,
            expected: 0,
            received: 0,
            buf: None,
            watch: StallWatch::new(policy),
        }
    }

    pub fn is_active(&self) -> bool {
        self.buf.is_some()
    }

    pub fn apply(&mut self, chunk: &DeviceBlobChunk, now: Instant) -> BlobOutcome {
        if chunk.is_begin() {
            self.open(chunk, now);
        }

        let Some(buf) = self.buf.as_mut() else {
            return BlobOutcome::Ignored;
        };
        if chunk.transfer_id != self.transfer_id {
            debug!(
                "device blob: chunk for transfer {} while {} is open",
                chunk.transfer_id, self.transfer_id
            );
            return BlobOutcome::Ignored;
        }
        let start = chunk.offset as usize;
        let Some(end) = start.checked_add(chunk.data.len()).filter(|&e| e <= self.expected) else {
            warn!(
                "device blob: chunk out of bounds (off={} len={} > {})",
                start,
                chunk.data.len(),
                self.expected
            );
            return BlobOutcome::Ignored;
        };

        self.watch.touch(now);
        buf[start..end].copy_from_slice(&chunk.data);
        self.received = self.received.max(end);

        if !chunk.is_end() {
            debug!(
                "device blob: transfer={} off={} len={} recv={}/{}",
                self.transfer_id,
                start,
                chunk.data.len(),
                self.received,
                self.expected
            );
            return BlobOutcome::Progress {
                received: self.received,
                expected: self.expected,
            };
        }

        let received = self.received;
        let expected = self.expected;
        let blob = self.close();
        match blob {
            Some(blob) if received == expected => {
                info!("device blob: updated, {} bytes", expected);
                BlobOutcome::Complete(blob)
            }
            _ => {
                warn!("device blob: incomplete recv={} expected={}", received, expected);
                BlobOutcome::Incomplete { received, expected }
            }
        }
    }

    /// Returns `true` if the open transfer stalled and should be re-requested.
    pub fn poll_stall(&mut self, now: Instant) -> bool {
        if self.buf.is_none() {
            return false;
        }
        let due = self.watch.poll(now);
        if due {
            warn!(
                "device blob stalled: recv={}/{} transfer={} retry={}",
                self.received,
                self.expected,
                self.transfer_id,
                self.watch.retries()
            );
        }
        due
    }

    fn open(&mut self, chunk: &DeviceBlobChunk, now: Instant) {
        self.close();
        let total = chunk.total_len as usize;
        self.transfer_id = chunk.transfer_id;
        if total == 0 {
            return;
        }
        if total > self.max_len {
            warn!("device blob: transfer of {} bytes exceeds limit {}", total, self.max_len);
            return;
        }
        self.expected = total;
        self.buf = Some(vec![0u8; total]);
        self.watch.start(now);
        info!("device blob: begin transfer={} total={}", chunk.transfer_id, total);
    }

    fn close(&mut self) -> Option<Vec<u8>> {
        self.expected = 0;
        self.received = 0;
        self.watch.stop();
        self.buf.take()
    }
}
