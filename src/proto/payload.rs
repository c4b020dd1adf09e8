//! Fixed-layout payload codecs.
//!
//! Every payload is a packed little-endian record with fixed field offsets.
//! Fields are written and read at explicit offsets; nothing here depends on
//! in-memory struct layout. Text fields are NUL-padded byte arrays: encoding
//! truncates to leave room for the terminator, decoding stops at the first
//! NUL. Decoding a short payload treats the missing tail as zeroes, so an
//! older peer sending a shorter record still decodes.

use heapless::{String, Vec};

use crate::app::model::{
    DeviceInfo, DeviceName, DeviceUid, EndpointInfo, MAX_CLUSTERS, Value, truncated,
};
use crate::error::ProtoError;
use crate::proto::codec::{MAX_PAYLOAD, Payload};
use crate::proto::types::{CommandId, SnapshotKind, Status, ValueType};

// ── Field helpers ────────────────────────────────────────────

pub(crate) fn put_u16(b: &mut [u8], off: usize, v: u16) {
    b[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(b: &mut [u8], off: usize, v: u32) {
    b[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(b: &mut [u8], off: usize, v: u64) {
    b[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_text(b: &mut [u8], off: usize, field_len: usize, s: &str) {
    let n = s.len().min(field_len - 1);
    b[off..off + n].copy_from_slice(&s.as_bytes()[..n]);
    b[off + n..off + field_len].fill(0);
}

pub(crate) fn get_u16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

pub(crate) fn get_u32(b: &[u8], off: usize) -> u32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[off..off + 4]);
    u32::from_le_bytes(a)
}

pub(crate) fn get_u64(b: &[u8], off: usize) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(a)
}

pub(crate) fn get_text<const N: usize>(b: &[u8], off: usize, field_len: usize) -> String<N> {
    let field = &b[off..off + field_len];
    let end = field.iter().position(|&c| c == 0).unwrap_or(field_len);
    let raw = &field[..end];
    let text = match core::str::from_utf8(raw) {
        Ok(s) => s,
        // Keep the valid prefix of a garbled field.
        Err(e) => core::str::from_utf8(&raw[..e.valid_up_to()]).unwrap_or(""),
    };
    truncated(text)
}

/// Value block: type u8, bool u8, i64, f32, text[24].
const VALUE_TEXT_LEN: usize = 24;

fn put_value(b: &mut [u8], off: usize, v: &Value) {
    let ty = match v {
        Value::None => ValueType::None,
        Value::Bool(x) => {
            b[off + 1] = u8::from(*x);
            ValueType::Bool
        }
        Value::I64(x) => {
            put_u64(b, off + 2, *x as u64);
            ValueType::I64
        }
        Value::F32(x) => {
            put_u32(b, off + 10, x.to_bits());
            ValueType::F32
        }
        Value::Text(s) => {
            put_text(b, off + 14, VALUE_TEXT_LEN, s);
            ValueType::Text
        }
    };
    b[off] = ty.code();
}

fn get_value(b: &[u8], off: usize) -> Value {
    match ValueType::from_code(b[off]) {
        Some(ValueType::Bool) => Value::Bool(b[off + 1] != 0),
        Some(ValueType::I64) => Value::I64(get_u64(b, off + 2) as i64),
        Some(ValueType::F32) => Value::F32(f32::from_bits(get_u32(b, off + 10))),
        Some(ValueType::Text) => Value::Text(get_text::<23>(b, off + 14, VALUE_TEXT_LEN)),
        Some(ValueType::None) | None => Value::None,
    }
}

fn get_clusters(b: &[u8], off: usize, count: u8) -> Vec<u16, MAX_CLUSTERS> {
    let n = (count as usize).min(MAX_CLUSTERS);
    (0..n).map(|i| get_u16(b, off + i * 2)).collect()
}

// ── Payload trait ────────────────────────────────────────────

/// A packed record carried as a frame payload.
pub trait WirePayload: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Write into `out`, which is exactly `SIZE` zeroed bytes.
    fn write_fixed(&self, out: &mut [u8]);

    /// Read from `raw`, which is exactly `SIZE` bytes.
    fn read_fixed(raw: &[u8]) -> Result<Self, ProtoError>;

    fn encode(&self) -> Result<Payload, ProtoError> {
        let mut out = Payload::new();
        out.resize_default(Self::SIZE).map_err(|_| ProtoError::Size)?;
        self.write_fixed(&mut out);
        Ok(out)
    }

    /// Decode a payload of any length. Bytes past `SIZE` are ignored and
    /// missing bytes read as zero.
    fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        if Self::SIZE > MAX_PAYLOAD {
            return Err(ProtoError::Size);
        }
        let mut raw = [0u8; MAX_PAYLOAD];
        let n = payload.len().min(Self::SIZE);
        raw[..n].copy_from_slice(&payload[..n]);
        Self::read_fixed(&raw[..Self::SIZE])
    }
}

// ── CMD_REQ ──────────────────────────────────────────────────

pub const BLOB_LEN: usize = 96;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Echo of the frame sequence number.
    pub req_id: u32,
    pub cmd: CommandId,
    pub device_uid: DeviceUid,
    pub short_addr: u16,
    pub endpoint: u8,
    pub cluster_id: u16,
    pub attr_id: u16,
    pub params: [i32; 3],
    pub value: Value,
    pub blob: [u8; BLOB_LEN],
}

impl CommandRequest {
    pub fn new(cmd: CommandId) -> Self {
        Self {
            req_id: 0,
            cmd,
            device_uid: DeviceUid::new(),
            short_addr: 0,
            endpoint: 0,
            cluster_id: 0,
            attr_id: 0,
            params: [0; 3],
            value: Value::None,
            blob: [0; BLOB_LEN],
        }
    }
}

impl WirePayload for CommandRequest {
    const SIZE: usize = 177;

    fn write_fixed(&self, b: &mut [u8]) {
        put_u32(b, 0, self.req_id);
        b[4] = self.cmd.code();
        put_text(b, 5, 19, &self.device_uid);
        put_u16(b, 24, self.short_addr);
        b[26] = self.endpoint;
        put_u16(b, 27, self.cluster_id);
        put_u16(b, 29, self.attr_id);
        for (i, p) in self.params.iter().enumerate() {
            put_u32(b, 31 + i * 4, *p as u32);
        }
        put_value(b, 43, &self.value);
        b[81..81 + BLOB_LEN].copy_from_slice(&self.blob);
    }

    fn read_fixed(b: &[u8]) -> Result<Self, ProtoError> {
        let mut blob = [0u8; BLOB_LEN];
        blob.copy_from_slice(&b[81..81 + BLOB_LEN]);
        Ok(Self {
            req_id: get_u32(b, 0),
            cmd: CommandId::try_from(b[4])?,
            device_uid: get_text(b, 5, 19),
            short_addr: get_u16(b, 24),
            endpoint: b[26],
            cluster_id: get_u16(b, 27),
            attr_id: get_u16(b, 29),
            params: [
                get_u32(b, 31) as i32,
                get_u32(b, 35) as i32,
                get_u32(b, 39) as i32,
            ],
            value: get_value(b, 43),
            blob,
        })
    }
}

// ── CMD_RSP ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub req_id: u32,
    pub status: Status,
    /// Raw Zigbee stack status, passed through for diagnostics.
    pub zb_status: u16,
    pub message: String<31>,
}

impl CommandResponse {
    pub fn new(req_id: u32, status: Status) -> Self {
        Self {
            req_id,
            status,
            zb_status: 0,
            message: String::new(),
        }
    }
}

impl WirePayload for CommandResponse {
    const SIZE: usize = 40;

    fn write_fixed(&self, b: &mut [u8]) {
        put_u32(b, 0, self.req_id);
        put_u16(b, 4, self.status.code());
        put_u16(b, 6, self.zb_status);
        put_text(b, 8, 32, &self.message);
    }

    fn read_fixed(b: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self {
            req_id: get_u32(b, 0),
            status: Status::from_wire(get_u16(b, 4)),
            zb_status: get_u16(b, 6),
            message: get_text(b, 8, 32),
        })
    }
}

// ── EVT ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventRecord {
    pub event_id: u32,
    pub ts_ms: u64,
    /// Raw event kind; unknown kinds are still published.
    pub evt_id: u8,
    pub event_type: String<31>,
    pub cmd: String<15>,
    pub device_uid: DeviceUid,
    pub short_addr: u16,
    pub endpoint: u8,
    pub cluster_id: u16,
    pub attr_id: u16,
    pub value: Value,
}

impl WirePayload for EventRecord {
    const SIZE: usize = 125;

    fn write_fixed(&self, b: &mut [u8]) {
        put_u32(b, 0, self.event_id);
        put_u64(b, 4, self.ts_ms);
        b[12] = self.evt_id;
        put_text(b, 13, 32, &self.event_type);
        put_text(b, 45, 16, &self.cmd);
        put_text(b, 61, 19, &self.device_uid);
        put_u16(b, 80, self.short_addr);
        b[82] = self.endpoint;
        put_u16(b, 83, self.cluster_id);
        put_u16(b, 85, self.attr_id);
        put_value(b, 87, &self.value);
    }

    fn read_fixed(b: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self {
            event_id: get_u32(b, 0),
            ts_ms: get_u64(b, 4),
            evt_id: b[12],
            event_type: get_text(b, 13, 32),
            cmd: get_text(b, 45, 16),
            device_uid: get_text(b, 61, 19),
            short_addr: get_u16(b, 80),
            endpoint: b[82],
            cluster_id: get_u16(b, 83),
            attr_id: get_u16(b, 85),
            value: get_value(b, 87),
        })
    }
}

// ── SNAPSHOT ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotRecord {
    /// Raw record kind; see [`SnapshotRecord::kind`].
    pub kind: u8,
    pub flags: u8,
    pub total_devices: u16,
    pub snapshot_seq: u32,
    pub device_uid: DeviceUid,
    pub short_addr: u16,
    pub last_seen_ms: u64,
    pub has_onoff: bool,
    pub has_button: bool,
    pub name: DeviceName,
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub in_clusters: Vec<u16, MAX_CLUSTERS>,
    pub out_clusters: Vec<u16, MAX_CLUSTERS>,
    pub state_cluster_id: u16,
    pub state_attr_id: u16,
    pub state_value: Value,
    pub state_ts_ms: u64,
}

impl SnapshotRecord {
    pub fn with_kind(kind: SnapshotKind) -> Self {
        Self {
            kind: kind.code(),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> Option<SnapshotKind> {
        SnapshotKind::from_code(self.kind)
    }

    pub fn device(&self) -> DeviceInfo {
        DeviceInfo {
            uid: self.device_uid.clone(),
            short_addr: self.short_addr,
            name: self.name.clone(),
            last_seen_ms: self.last_seen_ms,
            has_onoff: self.has_onoff,
            has_button: self.has_button,
        }
    }

    pub fn endpoint_info(&self) -> EndpointInfo {
        EndpointInfo {
            uid: self.device_uid.clone(),
            short_addr: self.short_addr,
            endpoint: self.endpoint,
            profile_id: self.profile_id,
            device_id: self.device_id,
            in_clusters: self.in_clusters.clone(),
            out_clusters: self.out_clusters.clone(),
        }
    }
}

impl WirePayload for SnapshotRecord {
    const SIZE: usize = 160;

    fn write_fixed(&self, b: &mut [u8]) {
        b[0] = self.kind;
        b[1] = self.flags;
        put_u16(b, 2, self.total_devices);
        put_u32(b, 4, self.snapshot_seq);
        put_text(b, 8, 19, &self.device_uid);
        put_u16(b, 27, self.short_addr);
        put_u64(b, 29, self.last_seen_ms);
        b[37] = u8::from(self.has_onoff);
        b[38] = u8::from(self.has_button);
        put_text(b, 39, 32, &self.name);
        b[71] = self.endpoint;
        put_u16(b, 72, self.profile_id);
        put_u16(b, 74, self.device_id);
        b[76] = self.in_clusters.len() as u8;
        b[77] = self.out_clusters.len() as u8;
        for (i, c) in self.in_clusters.iter().enumerate() {
            put_u16(b, 78 + i * 2, *c);
        }
        for (i, c) in self.out_clusters.iter().enumerate() {
            put_u16(b, 94 + i * 2, *c);
        }
        put_u16(b, 110, self.state_cluster_id);
        put_u16(b, 112, self.state_attr_id);
        put_value(b, 114, &self.state_value);
        put_u64(b, 152, self.state_ts_ms);
    }

    fn read_fixed(b: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self {
            kind: b[0],
            flags: b[1],
            total_devices: get_u16(b, 2),
            snapshot_seq: get_u32(b, 4),
            device_uid: get_text(b, 8, 19),
            short_addr: get_u16(b, 27),
            last_seen_ms: get_u64(b, 29),
            has_onoff: b[37] != 0,
            has_button: b[38] != 0,
            name: get_text(b, 39, 32),
            endpoint: b[71],
            profile_id: get_u16(b, 72),
            device_id: get_u16(b, 74),
            in_clusters: get_clusters(b, 78, b[76]),
            out_clusters: get_clusters(b, 94, b[77]),
            state_cluster_id: get_u16(b, 110),
            state_attr_id: get_u16(b, 112),
            state_value: get_value(b, 114),
            state_ts_ms: get_u64(b, 152),
        })
    }
}

// ── DEVICE_FB_CHUNK ──────────────────────────────────────────

pub const CHUNK_DATA_LEN: usize = 180;

/// First chunk of a transfer.
pub const CHUNK_FLAG_BEGIN: u8 = 0x01;
/// Last chunk of a transfer.
pub const CHUNK_FLAG_END: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceBlobChunk {
    pub transfer_id: u16,
    pub total_len: u32,
    pub offset: u32,
    pub flags: u8,
    pub data: Vec<u8, CHUNK_DATA_LEN>,
}

impl DeviceBlobChunk {
    pub fn is_begin(&self) -> bool {
        self.flags & CHUNK_FLAG_BEGIN != 0
    }

    pub fn is_end(&self) -> bool {
        self.flags & CHUNK_FLAG_END != 0
    }
}

impl WirePayload for DeviceBlobChunk {
    const SIZE: usize = 192;

    fn write_fixed(&self, b: &mut [u8]) {
        put_u16(b, 0, self.transfer_id);
        put_u32(b, 2, self.total_len);
        put_u32(b, 6, self.offset);
        b[10] = self.data.len() as u8;
        b[11] = self.flags;
        b[12..12 + self.data.len()].copy_from_slice(&self.data);
    }

    fn read_fixed(b: &[u8]) -> Result<Self, ProtoError> {
        let chunk_len = b[10] as usize;
        if chunk_len > CHUNK_DATA_LEN {
            return Err(ProtoError::Format);
        }
        Ok(Self {
            transfer_id: get_u16(b, 0),
            total_len: get_u32(b, 2),
            offset: get_u32(b, 6),
            flags: b[11],
            data: Vec::from_slice(&b[12..12 + chunk_len]).map_err(|_| ProtoError::Format)?,
        })
    }
}

/// Pack `ssid\0password\0` into a command blob.
pub fn wifi_blob(ssid: &str, password: &str) -> Result<[u8; BLOB_LEN], ProtoError> {
    let needed = ssid.len() + 1 + password.len() + 1;
    if ssid.is_empty() || needed > BLOB_LEN || ssid.contains('\0') || password.contains('\0') {
        return Err(ProtoError::Size);
    }
    let mut blob = [0u8; BLOB_LEN];
    blob[..ssid.len()].copy_from_slice(ssid.as_bytes());
    let pw_off = ssid.len() + 1;
    blob[pw_off..pw_off + password.len()].copy_from_slice(password.as_bytes());
    Ok(blob)
}
