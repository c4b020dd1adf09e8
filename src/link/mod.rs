//! The framed link: transport, correlation, reassembly and the I/O thread.
//!
//! ```text
//!  application thread(s)                 gwlink-io thread
//!  ─────────────────────                 ────────────────
//!  Link::call ─▶ Correlator ─┐           read_loop ─▶ FrameDecoder ─▶ Dispatcher
//!                            ▼                                          │
//!                 Shared::write_frame ◀──────────── Action::Reply/Sync ─┤
//!                            │                                          ▼
//!                        Transport ◀──── read ─┘        EventSink / DeviceRegistry
//! ```
//!
//! The transport sits behind an async mutex that is held for one read or
//! one frame write at a time, never across a wait for a response.

pub mod correlator;
pub mod device_blob;
pub mod dispatch;
mod io_task;
pub mod snapshot;
pub mod stall;
pub mod task_pin;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use futures_lite::future::block_on;
use log::{debug, info, warn};

pub use correlator::Correlator;
pub use dispatch::{Action, Collaborators, Dispatcher};
pub use transport::Transport;

use crate::app::commands::{self, OnOff};
use crate::app::model::Value;
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::proto::{CommandId, CommandRequest, CommandResponse, Frame, MessageType, WirePayload};

type Cs = CriticalSectionRawMutex;

/// Why the resync task was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resync {
    /// Request a snapshot right away.
    Request,
    /// A request was just acknowledged; re-request only if no BEGIN follows.
    AwaitBegin,
}

/// State shared between application callers and the I/O thread.
pub(crate) struct Shared<T> {
    transport: Mutex<Cs, T>,
    correlator: Correlator,
    config: LinkConfig,
    resync: Signal<Cs, Resync>,
    snapshot_begun: Signal<Cs, ()>,
    blob_refresh: Signal<Cs, ()>,
    stop: Signal<Cs, ()>,
    peer_alive: AtomicBool,
}

impl<T: Transport> Shared<T> {
    fn new(transport: T, config: LinkConfig) -> Self {
        Self {
            transport: Mutex::new(transport),
            correlator: Correlator::new(),
            config,
            resync: Signal::new(),
            snapshot_begun: Signal::new(),
            blob_refresh: Signal::new(),
            stop: Signal::new(),
            peer_alive: AtomicBool::new(false),
        }
    }

    /// Encode and write one frame, retrying short writes.
    async fn write_frame(&self, kind: MessageType, seq: u16, payload: &[u8]) -> Result<()> {
        let mut frame = Frame::new(kind, seq, payload)?;
        frame.version = self.config.protocol_version;
        let bytes = frame.to_bytes()?;

        let mut transport = self.transport.lock().await;
        let mut sent = 0;
        let mut attempts = 0u8;
        while sent < bytes.len() {
            match transport.write(&bytes[sent..]) {
                Ok(n) if n > 0 => {
                    sent += n;
                    continue;
                }
                Ok(_) => {}
                Err(e) => debug!("link: write error: {:?}", e),
            }
            attempts += 1;
            if attempts >= self.config.tx_write_attempts {
                warn!(
                    "link: {:?} seq={} stalled after {}/{} bytes",
                    kind,
                    seq,
                    sent,
                    bytes.len()
                );
                return Err(Error::Transport);
            }
            Timer::after_millis(1).await;
        }
        transport.flush().map_err(|_| Error::Transport)
    }

    async fn send_request(&self, mut req: CommandRequest, seq: u16) -> Result<()> {
        req.req_id = u32::from(seq);
        let payload = req.encode()?;
        self.write_frame(MessageType::CmdReq, seq, &payload).await
    }

    /// Issue a request and map the peer status.
    async fn call(&self, req: CommandRequest) -> Result<CommandResponse> {
        let cmd = req.cmd;
        let rsp = self
            .correlator
            .call(self.config.effective_response_timeout(), |seq| {
                self.send_request(req, seq)
            })
            .await?;
        debug!("link: {:?} -> {:?}", cmd, rsp.status);
        rsp.status.into_result()?;
        Ok(rsp)
    }

    async fn send_detached(&self, cmd: CommandId) -> Result<u16> {
        let req = CommandRequest::new(cmd);
        self.correlator
            .send_detached(|seq| self.send_request(req, seq))
            .await
    }
}

/// A running link.
///
/// Owns the I/O thread; dropping the link stops and joins it.
pub struct Link<T: Transport + Send + 'static> {
    shared: Arc<Shared<T>>,
    io: Option<JoinHandle<()>>,
}

impl<T: Transport + Send + 'static> Link<T> {
    /// Start the I/O thread, greet the peer and request the initial snapshot.
    ///
    /// The handshake is best-effort: a peer that does not answer HELLO or
    /// PING is not an error. If the initial snapshot request fails, or it
    /// is acknowledged but no BEGIN follows, the resync task keeps trying
    /// in the background.
    pub fn start(transport: T, config: LinkConfig, collab: Collaborators) -> Result<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(&config, collab);
        let shared = Arc::new(Shared::new(transport, config));

        let io_shared = shared.clone();
        let io = task_pin::spawn_on_core(task_pin::Core::Pro, 10, 32, "gwlink-io\0", move || {
            io_task::run_io_loop(io_shared, dispatcher);
        })
        .map_err(|e| {
            warn!("link: cannot spawn I/O thread: {}", e);
            Error::Internal
        })?;

        let link = Self {
            shared,
            io: Some(io),
        };

        for kind in [MessageType::Hello, MessageType::Ping] {
            let seq = link.shared.correlator.next_seq();
            if let Err(e) = block_on(link.shared.write_frame(kind, seq, &[])) {
                warn!("link: {:?} not sent: {}", kind, e);
            }
        }

        match link.call(commands::sync_snapshot()) {
            Ok(_) => {
                info!("link: initial snapshot requested");
                link.shared.resync.signal(Resync::AwaitBegin);
            }
            Err(e) => {
                warn!("link: initial snapshot request failed ({}), deferring to resync", e);
                link.shared.resync.signal(Resync::Request);
            }
        }
        Ok(link)
    }

    /// Issue one request and block until its response or the timeout.
    ///
    /// Non-OK peer statuses come back as the matching [`Error`].
    pub fn call(&self, req: CommandRequest) -> Result<CommandResponse> {
        block_on(self.shared.call(req))
    }

    pub async fn call_async(&self, req: CommandRequest) -> Result<CommandResponse> {
        self.shared.call(req).await
    }

    /// Send a request without waiting. Fails with [`Error::Busy`] while a
    /// call is in flight. Returns the sequence number used.
    pub fn send_detached(&self, cmd: CommandId) -> Result<u16> {
        block_on(self.shared.send_detached(cmd))
    }

    /// Ask the resync task to fetch a fresh snapshot.
    pub fn request_snapshot(&self) {
        self.shared.resync.signal(Resync::Request);
    }

    /// Whether the peer has answered HELLO or PING since start.
    pub fn is_peer_alive(&self) -> bool {
        self.shared.peer_alive.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Stop the I/O thread and wait for it to exit.
    pub fn shutdown(&mut self) {
        let Some(io) = self.io.take() else {
            return;
        };
        self.shared.stop.signal(());
        if io.join().is_err() {
            warn!("link: I/O thread panicked");
        }
    }

    // ── Typed commands ───────────────────────────────────────

    pub fn on_off(&self, device: &str, endpoint: u8, action: OnOff) -> Result<CommandResponse> {
        self.call(commands::on_off(device, endpoint, action)?)
    }

    pub fn level(
        &self,
        device: &str,
        endpoint: u8,
        level: u8,
        transition_ms: u32,
    ) -> Result<CommandResponse> {
        self.call(commands::level(device, endpoint, level, transition_ms)?)
    }

    pub fn color_xy(
        &self,
        device: &str,
        endpoint: u8,
        x: u16,
        y: u16,
        transition_ms: u32,
    ) -> Result<CommandResponse> {
        self.call(commands::color_xy(device, endpoint, x, y, transition_ms)?)
    }

    pub fn color_temp(
        &self,
        device: &str,
        endpoint: u8,
        mireds: u16,
        transition_ms: u32,
    ) -> Result<CommandResponse> {
        self.call(commands::color_temp(device, endpoint, mireds, transition_ms)?)
    }

    pub fn permit_join(&self, seconds: u8) -> Result<CommandResponse> {
        self.call(commands::permit_join(seconds))
    }

    pub fn read_attr(
        &self,
        device: &str,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
    ) -> Result<CommandResponse> {
        self.call(commands::read_attr(device, endpoint, cluster_id, attr_id)?)
    }

    pub fn write_attr(
        &self,
        device: &str,
        endpoint: u8,
        cluster_id: u16,
        attr_id: u16,
        value: Value,
    ) -> Result<CommandResponse> {
        self.call(commands::write_attr(device, endpoint, cluster_id, attr_id, value)?)
    }

    pub fn identify(&self, device: &str, endpoint: u8, seconds: u16) -> Result<CommandResponse> {
        self.call(commands::identify(device, endpoint, seconds)?)
    }

    pub fn sync_snapshot(&self) -> Result<CommandResponse> {
        self.call(commands::sync_snapshot())
    }

    pub fn sync_device_blob(&self) -> Result<CommandResponse> {
        self.call(commands::sync_device_blob())
    }

    pub fn set_device_name(&self, device: &str, name: &str) -> Result<CommandResponse> {
        self.call(commands::set_device_name(device, name)?)
    }

    pub fn remove_device(&self, device: &str) -> Result<CommandResponse> {
        self.call(commands::remove_device(device)?)
    }

    pub fn wifi_config_set(&self, ssid: &str, password: &str) -> Result<CommandResponse> {
        self.call(commands::wifi_config_set(ssid, password)?)
    }

    pub fn net_services_start(&self) -> Result<CommandResponse> {
        self.call(commands::net_services_start())
    }
}

impl<T: Transport + Send + 'static> Drop for Link<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ────────────────────────────────────────────────────
