//! gwlink-dump: decode a captured link byte stream.
//!
//! ```text
//! capture file ──▶ FrameDecoder ──▶ one line per frame (type, seq, payload summary)
//!                       └─────────▶ error counters (CRC / format / size)
//! ```
//!
//! Input is raw binary, or hex text with `--hex` (whitespace, commas and
//! `0x` prefixes are ignored).

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info};

use gwlink::error::ProtoError;
use gwlink::proto::{
    CommandRequest, CommandResponse, DeviceBlobChunk, EventRecord, Frame, FrameDecoder,
    MessageType, SnapshotKind, SnapshotRecord, WirePayload,
};

#[derive(Parser, Debug)]
#[command(name = "gwlink-dump", version, about = "Decode a captured gateway link stream")]
struct Args {
    /// Capture file to decode.
    file: PathBuf,

    /// Treat the file as hex text instead of raw bytes.
    #[arg(long)]
    hex: bool,

    /// Print only the totals.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Default)]
struct Totals {
    frames: usize,
    crc: usize,
    format: usize,
    size: usize,
}

impl Totals {
    fn errors(&self) -> usize {
        self.crc + self.format + self.size
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() / 2);
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token.trim_start_matches("0x").trim_start_matches("0X");
        if token.is_empty() {
            continue;
        }
        if token.len() % 2 != 0 {
            bail!("odd-length hex token {token:?}");
        }
        for pair in token.as_bytes().chunks(2) {
            let s = std::str::from_utf8(pair).context("non-ASCII hex")?;
            out.push(u8::from_str_radix(s, 16).with_context(|| format!("bad hex byte {s:?}"))?);
        }
    }
    Ok(out)
}

fn summary(frame: &Frame) -> String {
    let p = frame.payload.as_slice();
    let Some(kind) = frame.kind() else {
        return format!("type=0x{:02X} (unknown) len={}", frame.msg_type, p.len());
    };
    let detail = match kind {
        MessageType::CmdReq => CommandRequest::decode(p).map(|r| {
            format!(
                "req_id={} cmd={:?} dev={:?} ep={} params={:?}",
                r.req_id, r.cmd, r.device_uid, r.endpoint, r.params
            )
        }),
        MessageType::CmdRsp => CommandResponse::decode(p).map(|r| {
            format!(
                "req_id={} status={:?} zb=0x{:04X} msg={:?}",
                r.req_id, r.status, r.zb_status, r.message
            )
        }),
        MessageType::Evt => EventRecord::decode(p).map(|e| {
            format!(
                "id={} type={:?} dev={:?} ep={} cl=0x{:04X} at=0x{:04X} value={:?}",
                e.event_id, e.event_type, e.device_uid, e.endpoint, e.cluster_id, e.attr_id, e.value
            )
        }),
        MessageType::Snapshot => SnapshotRecord::decode(p).map(|s| match s.kind() {
            Some(SnapshotKind::Begin) => format!("BEGIN snap={} total={}", s.snapshot_seq, s.total_devices),
            Some(SnapshotKind::Device) => format!("DEVICE {:?} name={:?}", s.device_uid, s.name),
            Some(SnapshotKind::Endpoint) => format!("ENDPOINT {:?} ep={}", s.device_uid, s.endpoint),
            Some(SnapshotKind::State) => format!(
                "STATE {:?} cl=0x{:04X} value={:?}",
                s.device_uid, s.state_cluster_id, s.state_value
            ),
            Some(SnapshotKind::Remove) => format!("REMOVE {:?}", s.device_uid),
            Some(SnapshotKind::End) => format!("END snap={}", s.snapshot_seq),
            None => format!("kind=0x{:02X} (unknown)", s.kind),
        }),
        MessageType::DeviceBlobChunk => DeviceBlobChunk::decode(p).map(|c| {
            format!(
                "xfer={} off={}/{} len={} flags=0x{:02X}",
                c.transfer_id,
                c.offset,
                c.total_len,
                c.data.len(),
                c.flags
            )
        }),
        MessageType::Hello | MessageType::HelloAck | MessageType::Ping | MessageType::Pong => {
            Ok(String::new())
        }
    };
    match detail {
        Ok(d) if d.is_empty() => format!("{kind:?}"),
        Ok(d) => format!("{kind:?} {d}"),
        Err(e) => format!("{kind:?} <payload: {e}>"),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let raw = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let bytes = if args.hex {
        let text = String::from_utf8(raw).context("hex input is not UTF-8")?;
        parse_hex(&text)?
    } else {
        raw
    };
    debug!("decoding {} bytes", bytes.len());

    let mut decoder = FrameDecoder::new();
    let mut totals = Totals::default();
    decoder.feed_all(&bytes, |outcome| match outcome {
        Ok(frame) => {
            totals.frames += 1;
            if !args.quiet {
                println!("seq={:5} v{} {}", frame.seq, frame.version, summary(&frame));
            }
        }
        Err(e) => {
            match e {
                ProtoError::Crc => totals.crc += 1,
                ProtoError::Format => totals.format += 1,
                ProtoError::Size => totals.size += 1,
            }
            if !args.quiet {
                println!("!! {e}");
            }
        }
    });
    if decoder.in_frame() {
        info!("capture ends inside a frame");
    }

    info!(
        "{} frames, {} errors (crc={} format={} size={})",
        totals.frames,
        totals.errors(),
        totals.crc,
        totals.format,
        totals.size
    );
    Ok(())
}
