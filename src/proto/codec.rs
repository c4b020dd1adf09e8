//! Frame codec and streaming frame decoder.
//!
//! Wire format (all multi-byte fields little-endian):
//! ```text
//! ┌──────┬──────┬─────┬──────────┬───────┬─────────┬─────────┬─────────────┬─────────┐
//! │ 0xA5 │ 0x5A │ ver │ msg_type │ flags │ seq (2) │ len (2) │ payload (N) │ crc (2) │
//! └──────┴──────┴─────┴──────────┴───────┴─────────┴─────────┴─────────────┴─────────┘
//!              └──────────── CRC-16/CCITT-FALSE covers ver..payload ─────┘
//! ```
//!
//! The decoder accumulates incoming bytes one at a time and yields complete
//! frames. A single `Transport::read` may return part of a header, part of a
//! payload, line noise, or several frames back to back.

use crc::{CRC_16_IBM_3740, Crc};
use heapless::Vec;

use crate::error::ProtoError;
use crate::proto::types::MessageType;

pub const SYNC0: u8 = 0xA5;
pub const SYNC1: u8 = 0x5A;

/// Sync (2) + version + type + flags + seq (2) + len (2).
pub const HEADER_SIZE: usize = 9;
pub const CRC_SIZE: usize = 2;

/// Largest payload a frame may carry.
pub const MAX_PAYLOAD: usize = 192;

/// Largest encoded frame.
pub const MAX_FRAME: usize = HEADER_SIZE + MAX_PAYLOAD + CRC_SIZE;

/// Protocol version written by this side.
pub const PROTOCOL_VERSION: u8 = 1;

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no final XOR.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub type Payload = Vec<u8, MAX_PAYLOAD>;

pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    /// Raw `msg_type` byte; see [`Frame::kind`].
    pub msg_type: u8,
    pub flags: u8,
    pub seq: u16,
    pub payload: Payload,
}

impl Frame {
    pub fn new(kind: MessageType, seq: u16, payload: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type: kind.code(),
            flags: 0,
            seq,
            payload: Payload::from_slice(payload).map_err(|_| ProtoError::Size)?,
        })
    }

    /// Message type, or `None` for a code this side does not understand.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_code(self.msg_type)
    }

    /// Encoded size of this frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, ProtoError> {
        encode_frame(self.version, self.msg_type, self.flags, self.seq, &self.payload, out)
    }

    /// Encode into a fresh fixed-size buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8, MAX_FRAME>, ProtoError> {
        let mut buf = [0u8; MAX_FRAME];
        let n = self.encode(&mut buf)?;
        Vec::from_slice(&buf[..n]).map_err(|_| ProtoError::Size)
    }
}

/// Encode one frame into `out`.
///
/// Returns the number of bytes written. Fails with [`ProtoError::Size`] if
/// the payload exceeds [`MAX_PAYLOAD`] or `out` cannot hold the frame.
pub fn encode_frame(
    version: u8,
    msg_type: u8,
    flags: u8,
    seq: u16,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, ProtoError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtoError::Size);
    }
    let total = HEADER_SIZE + payload.len() + CRC_SIZE;
    if out.len() < total {
        return Err(ProtoError::Size);
    }

    out[0] = SYNC0;
    out[1] = SYNC1;
    out[2] = version;
    out[3] = msg_type;
    out[4] = flags;
    out[5..7].copy_from_slice(&seq.to_le_bytes());
    out[7..9].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    out[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);

    let crc = crc16(&out[2..HEADER_SIZE + payload.len()]);
    out[HEADER_SIZE + payload.len()..total].copy_from_slice(&crc.to_le_bytes());
    Ok(total)
}

/// Decode exactly one complete frame from `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ProtoError> {
    if bytes.len() < HEADER_SIZE + CRC_SIZE || bytes[0] != SYNC0 || bytes[1] != SYNC1 {
        return Err(ProtoError::Format);
    }
    let len = u16::from_le_bytes([bytes[7], bytes[8]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(ProtoError::Size);
    }
    if bytes.len() != HEADER_SIZE + len + CRC_SIZE {
        return Err(ProtoError::Format);
    }

    let body_end = HEADER_SIZE + len;
    let expected = u16::from_le_bytes([bytes[body_end], bytes[body_end + 1]]);
    if crc16(&bytes[2..body_end]) != expected {
        return Err(ProtoError::Crc);
    }

    Ok(Frame {
        version: bytes[2],
        msg_type: bytes[3],
        flags: bytes[4],
        seq: u16::from_le_bytes([bytes[5], bytes[6]]),
        payload: Payload::from_slice(&bytes[HEADER_SIZE..body_end]).map_err(|_| ProtoError::Size)?,
    })
}

// ── Streaming decoder ────────────────────────────────────────

/// Decoder state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Discarding until the first sync byte.
    AwaitSync0,
    /// First sync byte seen.
    AwaitSync1,
    /// Collecting header, payload and CRC.
    Body,
}

/// Streaming frame decoder.
///
/// Errors never wedge the decoder: after a CRC or size error it is back in
/// sync-hunting state and the next frame decodes normally.
pub struct FrameDecoder {
    state: DecoderState,
    buf: [u8; MAX_FRAME],
    len: usize,
    /// Full frame length once the header is in, 0 before.
    expected: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::AwaitSync0,
            buf: [0; MAX_FRAME],
            len: 0,
            expected: 0,
        }
    }

    /// Push a single byte.
    ///
    /// Returns `Some(Ok(frame))` when this byte completes a frame and
    /// `Some(Err(_))` when it completes a rejected one.
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, ProtoError>> {
        match self.state {
            DecoderState::AwaitSync0 => {
                if byte == SYNC0 {
                    self.buf[0] = byte;
                    self.len = 1;
                    self.state = DecoderState::AwaitSync1;
                }
                None
            }
            DecoderState::AwaitSync1 => {
                if byte == SYNC1 {
                    self.buf[1] = byte;
                    self.len = 2;
                    self.state = DecoderState::Body;
                } else if byte == SYNC0 {
                    // A5 A5 5A: the second A5 may be the real start.
                    self.len = 1;
                } else {
                    self.reset();
                }
                None
            }
            DecoderState::Body => {
                if self.len >= self.buf.len() {
                    self.reset();
                    return Some(Err(ProtoError::Size));
                }
                self.buf[self.len] = byte;
                self.len += 1;

                if self.len == HEADER_SIZE {
                    let payload_len = u16::from_le_bytes([self.buf[7], self.buf[8]]) as usize;
                    if payload_len > MAX_PAYLOAD {
                        self.reset();
                        return Some(Err(ProtoError::Size));
                    }
                    self.expected = HEADER_SIZE + payload_len + CRC_SIZE;
                }

                if self.expected != 0 && self.len == self.expected {
                    let result = decode_frame(&self.buf[..self.len]);
                    self.reset();
                    return Some(result);
                }
                None
            }
        }
    }

    /// Feed bytes until one frame completes, one error occurs, or `data`
    /// runs out.
    ///
    /// Returns how many bytes were consumed and the outcome, if any. The
    /// caller loops over `&data[consumed..]` to drain the rest.
    pub fn feed(&mut self, data: &[u8]) -> (usize, Option<Result<Frame, ProtoError>>) {
        for (i, &byte) in data.iter().enumerate() {
            if let Some(outcome) = self.push(byte) {
                return (i + 1, Some(outcome));
            }
        }
        (data.len(), None)
    }

    /// Feed all of `data`, handing every outcome to `on_frame` in order.
    pub fn feed_all<F>(&mut self, mut data: &[u8], mut on_frame: F)
    where
        F: FnMut(Result<Frame, ProtoError>),
    {
        while !data.is_empty() {
            let (consumed, outcome) = self.feed(data);
            if let Some(outcome) = outcome {
                on_frame(outcome);
            }
            data = &data[consumed..];
        }
    }

    /// Reset decoder state (e.g. after a transport reconnect).
    pub fn reset(&mut self) {
        self.state = DecoderState::AwaitSync0;
        self.len = 0;
        self.expected = 0;
    }

    /// Whether a partial frame is buffered.
    pub fn in_frame(&self) -> bool {
        self.state != DecoderState::AwaitSync0
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
