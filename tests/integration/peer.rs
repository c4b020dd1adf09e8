//! Fake radio controller on the far end of an in-memory pipe.
//!
//! Answers HELLO and PING, records every command request, replies with a
//! per-command status and streams a scripted snapshot after SYNC_SNAPSHOT.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gwlink::app::model::truncated;
use gwlink::link::Transport;
use gwlink::link::transport::PipeEnd;
use gwlink::proto::payload::{CHUNK_FLAG_BEGIN, CHUNK_FLAG_END};
use gwlink::proto::{
    CommandId, CommandRequest, CommandResponse, DeviceBlobChunk, EventRecord, Frame, FrameDecoder,
    MessageType, SnapshotKind, SnapshotRecord, Status, WirePayload,
};

/// How the fake peer behaves.
#[derive(Clone, Default)]
pub struct Script {
    /// Never answer anything.
    pub mute: bool,
    /// Status per command; unlisted commands get `Ok`.
    pub statuses: HashMap<u8, Status>,
    /// Records streamed after every SYNC_SNAPSHOT response.
    pub snapshot: Vec<SnapshotRecord>,
    /// Blob streamed after every SYNC_DEVICE_FB response.
    pub device_blob: Option<Vec<u8>>,
}

impl Script {
    pub fn with_status(mut self, cmd: CommandId, status: Status) -> Self {
        self.statuses.insert(cmd.code(), status);
        self
    }
}

pub fn begin(total: u16) -> SnapshotRecord {
    SnapshotRecord {
        total_devices: total,
        snapshot_seq: 1,
        ..SnapshotRecord::with_kind(SnapshotKind::Begin)
    }
}

pub fn device(uid: &str, onoff: bool) -> SnapshotRecord {
    let mut r = SnapshotRecord::with_kind(SnapshotKind::Device);
    r.device_uid = truncated(uid);
    r.short_addr = 0x2000;
    r.has_onoff = onoff;
    r
}

pub fn endpoint(uid: &str, ep: u8) -> SnapshotRecord {
    let mut r = SnapshotRecord::with_kind(SnapshotKind::Endpoint);
    r.device_uid = truncated(uid);
    r.endpoint = ep;
    r.profile_id = 0x0104;
    r.in_clusters.push(0x0006).unwrap();
    r
}

pub fn state(uid: &str, on: bool) -> SnapshotRecord {
    let mut r = SnapshotRecord::with_kind(SnapshotKind::State);
    r.device_uid = truncated(uid);
    r.endpoint = 1;
    r.state_cluster_id = 0x0006;
    r.state_value = gwlink::app::model::Value::Bool(on);
    r
}

pub fn end() -> SnapshotRecord {
    SnapshotRecord::with_kind(SnapshotKind::End)
}

pub struct FakeRadio {
    writer: PipeEnd,
    requests: Arc<Mutex<Vec<(u16, CommandRequest)>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    seq: u16,
}

fn send(end: &mut PipeEnd, kind: MessageType, seq: u16, payload: &[u8]) {
    let bytes = Frame::new(kind, seq, payload).unwrap().to_bytes().unwrap();
    let mut sent = 0;
    while sent < bytes.len() {
        sent += end.write(&bytes[sent..]).unwrap();
    }
}

fn serve(mut end: PipeEnd, script: Script, requests: Arc<Mutex<Vec<(u16, CommandRequest)>>>, stop: Arc<AtomicBool>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];
    let mut snap_seq = 0u16;
    while !stop.load(Ordering::Relaxed) {
        let n = end.read(&mut buf).unwrap();
        if n == 0 {
            thread::sleep(Duration::from_millis(2));
            continue;
        }
        let mut frames = Vec::new();
        decoder.feed_all(&buf[..n], |outcome| {
            if let Ok(frame) = outcome {
                frames.push(frame);
            }
        });
        for frame in frames {
            if script.mute {
                continue;
            }
            match frame.kind() {
                Some(MessageType::Hello) => send(&mut end, MessageType::HelloAck, frame.seq, &[]),
                Some(MessageType::Ping) => send(&mut end, MessageType::Pong, frame.seq, &[]),
                Some(MessageType::CmdReq) => {
                    let req = CommandRequest::decode(&frame.payload).unwrap();
                    requests.lock().unwrap().push((frame.seq, req.clone()));
                    let status = script
                        .statuses
                        .get(&req.cmd.code())
                        .copied()
                        .unwrap_or(Status::Ok);
                    let rsp = CommandResponse::new(req.req_id, status).encode().unwrap();
                    send(&mut end, MessageType::CmdRsp, frame.seq, &rsp);
                    if status != Status::Ok {
                        continue;
                    }
                    match req.cmd {
                        CommandId::SyncSnapshot => {
                            for rec in &script.snapshot {
                                snap_seq = snap_seq.wrapping_add(1);
                                let p = rec.encode().unwrap();
                                send(&mut end, MessageType::Snapshot, snap_seq, &p);
                            }
                        }
                        CommandId::SyncDeviceBlob => {
                            if let Some(blob) = &script.device_blob {
                                stream_blob(&mut end, blob);
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }
}

fn stream_blob(end: &mut PipeEnd, blob: &[u8]) {
    let chunk_len = gwlink::proto::payload::CHUNK_DATA_LEN;
    let chunks: Vec<&[u8]> = blob.chunks(chunk_len).collect();
    for (i, data) in chunks.iter().enumerate() {
        let mut flags = 0;
        if i == 0 {
            flags |= CHUNK_FLAG_BEGIN;
        }
        if i + 1 == chunks.len() {
            flags |= CHUNK_FLAG_END;
        }
        let chunk = DeviceBlobChunk {
            transfer_id: 7,
            total_len: blob.len() as u32,
            offset: (i * chunk_len) as u32,
            flags,
            data: heapless::Vec::from_slice(data).unwrap(),
        };
        send(end, MessageType::DeviceBlobChunk, 0x8000 + i as u16, &chunk.encode().unwrap());
    }
}

impl FakeRadio {
    pub fn spawn(end: PipeEnd, script: Script) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let writer = end.clone();
        let handle = {
            let requests = requests.clone();
            let stop = stop.clone();
            thread::spawn(move || serve(end, script, requests, stop))
        };
        Self {
            writer,
            requests,
            stop,
            handle: Some(handle),
            seq: 0x4000,
        }
    }

    /// Every request received so far with the frame sequence it came in.
    pub fn requests(&self) -> Vec<(u16, CommandRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, cmd: CommandId) -> usize {
        self.requests().iter().filter(|(_, r)| r.cmd == cmd).count()
    }

    /// Push an unsolicited EVT frame.
    pub fn publish(&mut self, event: &EventRecord) {
        self.seq = self.seq.wrapping_add(1);
        send(&mut self.writer, MessageType::Evt, self.seq, &event.encode().unwrap());
    }

    /// Push raw bytes, frame or not.
    pub fn inject(&mut self, bytes: &[u8]) {
        let mut sent = 0;
        while sent < bytes.len() {
            sent += self.writer.write(&bytes[sent..]).unwrap();
        }
    }
}

impl Drop for FakeRadio {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
