//! Transport abstraction for any byte-oriented full-duplex channel.
//!
//! Concrete implementations:
//! - UART driver on ESP-IDF (`adapters::uart`)
//! - In-memory pipe pair for host tests and loopback tooling
//!
//! The link is generic over `Transport`, so swapping the physical channel
//! requires zero changes to framing or correlation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns the number of bytes actually read.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written, possibly fewer than
    /// `data.len()` when the TX buffer is full.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Check if data is available for reading.
    fn available(&self) -> bool;
}

/// A null transport that discards all writes and never reads.
pub struct NullTransport;

impl Transport for NullTransport {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn available(&self) -> bool {
        false
    }
}

// ── In-memory pipe ───────────────────────────────────────────

type Queue = Arc<Mutex<VecDeque<u8>>>;

/// Error raised when the peer end's queue lock is poisoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeClosed;

/// One end of an in-memory full-duplex byte pipe.
///
/// Created in pairs by [`pipe`]; bytes written on one end are read on the
/// other. An optional write capacity models a bounded UART TX FIFO.
#[derive(Clone)]
pub struct PipeEnd {
    rx: Queue,
    tx: Queue,
    tx_capacity: Option<usize>,
}

/// Create a connected pair of pipe ends.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let a: Queue = Arc::new(Mutex::new(VecDeque::new()));
    let b: Queue = Arc::new(Mutex::new(VecDeque::new()));
    (
        PipeEnd {
            rx: a.clone(),
            tx: b.clone(),
            tx_capacity: None,
        },
        PipeEnd {
            rx: b,
            tx: a,
            tx_capacity: None,
        },
    )
}

impl PipeEnd {
    /// Limit how many bytes may sit unread in the outbound queue.
    pub fn with_tx_capacity(mut self, capacity: usize) -> Self {
        self.tx_capacity = Some(capacity);
        self
    }

    /// Bytes waiting to be read on this end.
    pub fn pending(&self) -> usize {
        self.rx.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl Transport for PipeEnd {
    type Error = PipeClosed;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PipeClosed> {
        let mut q = self.rx.lock().map_err(|_| PipeClosed)?;
        let n = buf.len().min(q.len());
        for (slot, byte) in buf.iter_mut().zip(q.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, PipeClosed> {
        let mut q = self.tx.lock().map_err(|_| PipeClosed)?;
        let room = match self.tx_capacity {
            Some(cap) => cap.saturating_sub(q.len()),
            None => data.len(),
        };
        let n = room.min(data.len());
        q.extend(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), PipeClosed> {
        Ok(())
    }

    fn available(&self) -> bool {
        self.pending() > 0
    }
}
