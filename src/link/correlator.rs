//! Request/response correlation over a single-duplex link.
//!
//! At most one call is in flight. The caller holds `call_lock` for the whole
//! exchange; the dispatcher matches an inbound `CMD_RSP` against the armed
//! sequence number inside a critical section and raises the response signal.
//!
//! ```text
//!  caller                         I/O thread (dispatcher)
//!  ──────                         ───────────────────────
//!  lock call_lock (≤ timeout)
//!  seq = next_seq()
//!  reset signal, arm slot(seq)
//!  send CMD_REQ(seq) ───────────▶
//!                                 CMD_RSP(seq') arrives
//!                                 CS { slot.armed && seq' == seq → disarm }
//!  wait signal (≤ deadline) ◀──── signal(seq', rsp)
//!  seq' == seq → return rsp
//! ```
//!
//! A response that arrives after its caller timed out finds the slot
//! disarmed and is dropped. The waiter additionally re-checks the sequence
//! of whatever it is woken with, so a stale signal can never satisfy a
//! later call.

use core::cell::RefCell;
use core::future::Future;
use core::sync::atomic::{AtomicU16, Ordering};
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Instant, with_deadline, with_timeout};
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::proto::CommandResponse;

#[derive(Debug, Clone, Copy)]
struct WaitSlot {
    seq: u16,
    armed: bool,
}

pub struct Correlator {
    call_lock: Mutex<CriticalSectionRawMutex, ()>,
    last_seq: AtomicU16,
    slot: BlockingMutex<CriticalSectionRawMutex, RefCell<WaitSlot>>,
    response: Signal<CriticalSectionRawMutex, (u16, CommandResponse)>,
}

pub(crate) fn embassy_duration(d: Duration) -> embassy_time::Duration {
    embassy_time::Duration::from_micros(d.as_micros().min(u128::from(u64::MAX)) as u64)
}

impl Correlator {
    pub const fn new() -> Self {
        Self {
            call_lock: Mutex::new(()),
            last_seq: AtomicU16::new(0),
            slot: BlockingMutex::new(RefCell::new(WaitSlot { seq: 0, armed: false })),
            response: Signal::new(),
        }
    }

    /// Allocate the next frame sequence number. Wraps at 16 bits.
    pub fn next_seq(&self) -> u16 {
        self.last_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Whether a call is currently waiting for its response.
    pub fn is_waiting(&self) -> bool {
        self.slot.lock(|s| s.borrow().armed)
    }

    /// Issue one call.
    ///
    /// `send` transmits the request carrying the sequence number it is
    /// given. Returns the raw response; status mapping is up to the caller.
    pub async fn call<F, Fut>(&self, timeout: Duration, send: F) -> Result<CommandResponse>
    where
        F: FnOnce(u16) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let timeout = embassy_duration(timeout);
        let _guard = with_timeout(timeout, self.call_lock.lock())
            .await
            .map_err(|_| Error::Timeout)?;

        let seq = self.next_seq();
        self.response.reset();
        self.arm(seq);

        if let Err(e) = send(seq).await {
            self.disarm(seq);
            return Err(e);
        }

        let deadline = Instant::now() + timeout;
        loop {
            match with_deadline(deadline, self.response.wait()).await {
                Ok((got, rsp)) if got == seq => return Ok(rsp),
                Ok((got, _)) => debug!("correlator: discarding stale response seq={}", got),
                Err(_) => {
                    self.disarm(seq);
                    warn!("correlator: no response for seq={}", seq);
                    return Err(Error::Timeout);
                }
            }
        }
    }

    /// Send without waiting for a response.
    ///
    /// Fails with [`Error::Busy`] instead of queueing behind an in-flight
    /// call. Any response that comes back is dropped as unmatched.
    pub async fn send_detached<F, Fut>(&self, send: F) -> Result<u16>
    where
        F: FnOnce(u16) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Ok(_guard) = self.call_lock.try_lock() else {
            return Err(Error::Busy);
        };
        let seq = self.next_seq();
        send(seq).await?;
        Ok(seq)
    }

    /// Deliver an inbound response. Returns `true` if it completed the
    /// in-flight call.
    pub fn on_response(&self, seq: u16, rsp: CommandResponse) -> bool {
        let matched = self.slot.lock(|s| {
            let mut s = s.borrow_mut();
            if s.armed && s.seq == seq {
                s.armed = false;
                true
            } else {
                false
            }
        });
        if matched {
            self.response.signal((seq, rsp));
        } else {
            debug!("correlator: unmatched response seq={}", seq);
        }
        matched
    }

    fn arm(&self, seq: u16) {
        self.slot.lock(|s| *s.borrow_mut() = WaitSlot { seq, armed: true });
    }

    fn disarm(&self, seq: u16) {
        self.slot.lock(|s| {
            let mut s = s.borrow_mut();
            if s.seq == seq {
                s.armed = false;
            }
        });
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
