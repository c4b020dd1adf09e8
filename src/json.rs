//! Dotted-path lookups into JSON documents.
//!
//! Paths are object keys joined by `.` and match case-sensitively. There is
//! no array indexing. An empty path, or an empty segment (`"a..b"`), never
//! matches.

use serde_json::Value;

use crate::error::{Error, ProtoError, Result};

/// Longest accepted path segment.
const MAX_SEGMENT: usize = 63;

/// Walk `path` from `root`.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |node, key| {
        if key.is_empty() || key.len() > MAX_SEGMENT {
            return None;
        }
        node.as_object()?.get(key)
    })
}

/// The number at `path`.
pub fn number(root: &Value, path: &str) -> Result<f64> {
    lookup(root, path)
        .and_then(Value::as_f64)
        .ok_or(Error::NotFound)
}

/// The string at `path`.
pub fn text<'a>(root: &'a Value, path: &str) -> Result<&'a str> {
    lookup(root, path)
        .and_then(Value::as_str)
        .ok_or(Error::NotFound)
}

/// Parse `body` and take the number at `path`.
pub fn number_in(body: &str, path: &str) -> Result<f64> {
    number(&parse(body)?, path)
}

/// Parse `body` and take the string at `path`.
pub fn text_in(body: &str, path: &str) -> Result<String> {
    text(&parse(body)?, path).map(str::to_owned)
}

fn parse(body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|e| {
        log::debug!("json: parse failed: {}", e);
        Error::Proto(ProtoError::Format)
    })
}
