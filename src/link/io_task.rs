//! Link I/O thread.
//!
//! One dedicated thread owns the inbound side of the link. It runs three
//! cooperative tasks on an `edge-executor` local executor:
//!
//! 1. **Read**: pulls bytes from the transport, feeds the frame decoder and
//!    hands each frame to the [`Dispatcher`] in arrival order. Also ticks
//!    the stall watchdogs.
//! 2. **Resync**: sleeps on the resync signal; when woken it re-requests
//!    the snapshot for a bounded number of rounds until a BEGIN shows up.
//!    After an acknowledged initial request it first waits one backoff
//!    period for that request's BEGIN.
//! 3. **Blob refresh**: after each complete snapshot, requests the device
//!    blob.
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────┐
//!  │  gwlink-io thread                                    │
//!  │  futures_lite::block_on(executor.run(stop.wait()))   │
//!  │  ┌───────────────────┐   ┌────────────────────────┐  │
//!  │  │ read_loop         │   │ resync_loop            │  │
//!  │  │ poll ⏱ when idle  │──▶│ wake-on-signal         │  │
//!  │  │                   │   ├────────────────────────┤  │
//!  │  │                   │──▶│ blob_refresh_loop      │  │
//!  │  └───────────────────┘   └────────────────────────┘  │
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! All tasks share the thread, so a call issued by the resync task still
//! gets its response: the call awaits, the read task runs and completes it.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use embassy_time::{Instant, Timer, with_timeout};
use log::{debug, info, warn};

use super::{Resync, Shared};
use super::correlator::embassy_duration;
use super::dispatch::{Action, Actions, Dispatcher};
use super::transport::Transport;
use crate::app::commands;
use crate::proto::FrameDecoder;

async fn perform<T: Transport>(shared: &Shared<T>, actions: Actions) {
    for action in actions {
        match action {
            Action::Reply { kind, seq } => {
                if let Err(e) = shared.write_frame(kind, seq, &[]).await {
                    warn!("link: {:?} reply failed: {}", kind, e);
                }
            }
            Action::SyncDetached(cmd) => {
                if let Err(e) = shared.send_detached(cmd).await {
                    warn!("link: detached {:?} not sent: {}", cmd, e);
                }
            }
            Action::Resync => shared.resync.signal(Resync::Request),
            Action::SnapshotBegun => shared.snapshot_begun.signal(()),
            Action::RefreshDeviceBlob => shared.blob_refresh.signal(()),
            Action::PeerAlive => shared.peer_alive.store(true, Ordering::Relaxed),
        }
    }
}

pub(crate) async fn read_loop<T: Transport>(shared: Arc<Shared<T>>, mut dispatcher: Dispatcher) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; usize::from(shared.config.read_chunk_size)];
    let idle = embassy_duration(shared.config.poll_interval());

    loop {
        let due = dispatcher.poll(Instant::now());
        perform(&shared, due).await;

        let n = {
            let mut transport = shared.transport.lock().await;
            match transport.read(&mut buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!("link: read failed: {:?}", e);
                    0
                }
            }
        };
        if n == 0 {
            Timer::after(idle).await;
            continue;
        }

        let mut data = &buf[..n];
        while !data.is_empty() {
            let (used, outcome) = decoder.feed(data);
            data = &data[used..];
            match outcome {
                Some(Ok(frame)) => {
                    let actions = dispatcher.dispatch(&frame, &shared.correlator, Instant::now());
                    perform(&shared, actions).await;
                }
                Some(Err(e)) => warn!("link: dropped frame: {}", e),
                None => {}
            }
        }
        futures_lite::future::yield_now().await;
    }
}

pub(crate) async fn resync_loop<T: Transport>(shared: Arc<Shared<T>>) {
    let backoff = embassy_duration(shared.config.resync_backoff());
    loop {
        let mut begun = match shared.resync.wait().await {
            // BEGIN may already be signalled by the time we get here.
            Resync::AwaitBegin => with_timeout(backoff, shared.snapshot_begun.wait())
                .await
                .is_ok(),
            Resync::Request => {
                shared.snapshot_begun.reset();
                false
            }
        };
        if begun {
            debug!("link: initial snapshot began");
            continue;
        }

        let rounds = shared.config.resync_rounds;
        for round in 1..=rounds {
            info!("link: snapshot resync round {}/{}", round, rounds);
            if let Err(e) = shared.call(commands::sync_snapshot()).await {
                warn!("link: SYNC_SNAPSHOT failed: {}", e);
            }
            if with_timeout(backoff, shared.snapshot_begun.wait()).await.is_ok() {
                begun = true;
                break;
            }
        }
        if begun {
            debug!("link: resync satisfied by BEGIN");
        } else {
            warn!("link: no snapshot after {} resync rounds, giving up", rounds);
        }
    }
}

/// Fetch the device blob after each complete snapshot.
///
/// Runs as a full call so it queues behind whatever call is in flight
/// instead of failing busy.
pub(crate) async fn blob_refresh_loop<T: Transport>(shared: Arc<Shared<T>>) {
    loop {
        shared.blob_refresh.wait().await;
        if let Err(e) = shared.call(commands::sync_device_blob()).await {
            warn!("link: SYNC_DEVICE_FB failed: {}", e);
        }
    }
}

/// Thread body: run the tasks until `stop` is signalled.
pub(crate) fn run_io_loop<T: Transport>(shared: Arc<Shared<T>>, dispatcher: Dispatcher) {
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();

    executor
        .spawn(read_loop(shared.clone(), dispatcher))
        .detach();
    executor.spawn(resync_loop(shared.clone())).detach();
    executor.spawn(blob_refresh_loop(shared.clone())).detach();

    info!("link: I/O task started");
    futures_lite::future::block_on(executor.run(shared.stop.wait()));
    info!("link: I/O task stopped");
}
