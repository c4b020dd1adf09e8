//! Wire protocol between the radio controller and the application controller.
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌─────────────────────┐
//! │ byte stream  │──▶│  FrameDecoder   │──▶│ Frame { type, seq } │
//! └──────────────┘   │  (codec)        │   └──────────┬──────────┘
//!                    └─────────────────┘              │
//!                                                     ▼
//!                                         ┌───────────────────────┐
//!                                         │ payload::WirePayload  │
//!                                         │ (fixed-offset codecs) │
//!                                         └───────────────────────┘
//! ```

pub mod codec;
pub mod payload;
pub mod types;

pub use codec::{Frame, FrameDecoder, MAX_FRAME, MAX_PAYLOAD};
pub use payload::{
    CommandRequest, CommandResponse, DeviceBlobChunk, EventRecord, SnapshotRecord, WirePayload,
};
pub use types::{CommandId, EventKind, MessageType, SnapshotKind, Status, ValueType};
