//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every [`LinkEvent`] to the logger
//! (UART / USB-CDC console in production). Also logs device blob transfers
//! so a gateway can run with nothing but a console attached.

use log::info;

use crate::app::events::{EventSource, LinkEvent};
use crate::app::model::Value;
use crate::app::ports::{DeviceBlobSink, EventSink};

/// Adapter that logs every [`LinkEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events logged so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

struct ShowValue<'a>(&'a Value);

impl core::fmt::Display for ShowValue<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.0 {
            Value::None => write!(f, "-"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v:.2}"),
            Value::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &LinkEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        let tag = match event.source {
            EventSource::Radio => "EVT ",
            EventSource::Snapshot => "SNAP",
        };
        if event.cmd.is_empty() {
            info!(
                "{} | {} | {} ep={} | cl=0x{:04X} at=0x{:04X} | {}",
                tag,
                event.event_type,
                event.device_uid,
                event.endpoint,
                event.cluster_id,
                event.attr_id,
                ShowValue(&event.value),
            );
        } else {
            info!(
                "{} | {} | {} ep={} | cmd={} cl=0x{:04X}",
                tag, event.event_type, event.device_uid, event.endpoint, event.cmd, event.cluster_id,
            );
        }
    }
}

/// Logs the size of each completed device blob and drops it.
#[derive(Debug, Default)]
pub struct LogBlobSink;

impl DeviceBlobSink for LogBlobSink {
    fn store(&mut self, blob: &[u8]) -> crate::Result<()> {
        info!("BLOB | device blob received ({} bytes)", blob.len());
        Ok(())
    }
}
