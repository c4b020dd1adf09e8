//! Typed command builders.
//!
//! One constructor per command id, each packing its arguments into the
//! positional `param0..param2` / value / blob fields the radio side expects.
//! Arguments are checked here so a malformed request never reaches the wire.

use crate::app::model::{DeviceUid, Value, truncated};
use crate::error::{Error, Result};
use crate::proto::payload::wifi_blob;
use crate::proto::{CommandId, CommandRequest};

/// On/Off cluster action, carried in `param0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OnOff {
    Off = 0,
    On = 1,
    Toggle = 2,
}

/// Highest valid Level cluster value.
pub const MAX_LEVEL: u8 = 254;

fn deciseconds(transition_ms: u32) -> i32 {
    (transition_ms / 100).min(i32::MAX as u32) as i32
}

fn uid(s: &str) -> Result<DeviceUid> {
    if s.is_empty() || s.len() > 18 {
        return Err(Error::InvalidArgs);
    }
    Ok(truncated(s))
}

fn addressed(cmd: CommandId, device: &str, endpoint: u8) -> Result<CommandRequest> {
    let mut req = CommandRequest::new(cmd);
    req.device_uid = uid(device)?;
    req.endpoint = endpoint;
    Ok(req)
}

pub fn on_off(device: &str, endpoint: u8, action: OnOff) -> Result<CommandRequest> {
    let mut req = addressed(CommandId::OnOff, device, endpoint)?;
    req.params[0] = action as i32;
    Ok(req)
}

pub fn level(device: &str, endpoint: u8, level: u8, transition_ms: u32) -> Result<CommandRequest> {
    if level > MAX_LEVEL {
        return Err(Error::InvalidArgs);
    }
    let mut req = addressed(CommandId::Level, device, endpoint)?;
    req.params = [i32::from(level), deciseconds(transition_ms), 0];
    Ok(req)
}

pub fn color_xy(device: &str, endpoint: u8, x: u16, y: u16, transition_ms: u32) -> Result<CommandRequest> {
    let mut req = addressed(CommandId::ColorXy, device, endpoint)?;
    req.params = [i32::from(x), i32::from(y), deciseconds(transition_ms)];
    Ok(req)
}

pub fn color_temp(device: &str, endpoint: u8, mireds: u16, transition_ms: u32) -> Result<CommandRequest> {
    let mut req = addressed(CommandId::ColorTemp, device, endpoint)?;
    req.params = [i32::from(mireds), deciseconds(transition_ms), 0];
    Ok(req)
}

pub fn permit_join(seconds: u8) -> CommandRequest {
    let mut req = CommandRequest::new(CommandId::PermitJoin);
    req.params[0] = i32::from(seconds);
    req
}

pub fn read_attr(device: &str, endpoint: u8, cluster_id: u16, attr_id: u16) -> Result<CommandRequest> {
    let mut req = addressed(CommandId::ReadAttr, device, endpoint)?;
    req.cluster_id = cluster_id;
    req.attr_id = attr_id;
    Ok(req)
}

pub fn write_attr(
    device: &str,
    endpoint: u8,
    cluster_id: u16,
    attr_id: u16,
    value: Value,
) -> Result<CommandRequest> {
    if value == Value::None {
        return Err(Error::InvalidArgs);
    }
    let mut req = addressed(CommandId::WriteAttr, device, endpoint)?;
    req.cluster_id = cluster_id;
    req.attr_id = attr_id;
    req.value = value;
    Ok(req)
}

pub fn identify(device: &str, endpoint: u8, seconds: u16) -> Result<CommandRequest> {
    let mut req = addressed(CommandId::Identify, device, endpoint)?;
    req.params[0] = i32::from(seconds);
    Ok(req)
}

pub fn sync_snapshot() -> CommandRequest {
    CommandRequest::new(CommandId::SyncSnapshot)
}

pub fn sync_device_blob() -> CommandRequest {
    CommandRequest::new(CommandId::SyncDeviceBlob)
}

pub fn set_device_name(device: &str, name: &str) -> Result<CommandRequest> {
    let mut req = CommandRequest::new(CommandId::SetDeviceName);
    req.device_uid = uid(device)?;
    req.value = Value::text(name);
    Ok(req)
}

pub fn remove_device(device: &str) -> Result<CommandRequest> {
    let mut req = CommandRequest::new(CommandId::RemoveDevice);
    req.device_uid = uid(device)?;
    Ok(req)
}

/// Station credentials, packed as `ssid\0password\0` into the blob.
pub fn wifi_config_set(ssid: &str, password: &str) -> Result<CommandRequest> {
    let mut req = CommandRequest::new(CommandId::WifiConfigSet);
    req.blob = wifi_blob(ssid, password).map_err(|_| Error::InvalidArgs)?;
    Ok(req)
}

pub fn net_services_start() -> CommandRequest {
    CommandRequest::new(CommandId::NetServicesStart)
}
