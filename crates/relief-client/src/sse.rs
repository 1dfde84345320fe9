//! Parsing of the server's event stream body.
//!
//! The body is a sequence of lines. Only `data:` lines carrying a JSON
//! object with at least `type` and `timestamp` are events; comment lines
//! (heartbeats), `id:` lines, blank separators and anything malformed are
//! dropped without error.

use relief_types::Payload;
use serde::Deserialize;

/// An event as received by the client.
///
/// `id` and `channel` are absent on the synthetic `connected` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Payload,
    pub timestamp: i64,
}

/// Parses one body line. Returns `None` for anything that is not a
/// well-formed event.
pub fn parse_line(line: &str) -> Option<InboundEvent> {
    let data = line.strip_prefix("data:")?;
    serde_json::from_str(data.trim_start()).ok()
}

/// Reassembles complete lines from arbitrarily split body chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends a chunk and returns every line it completed, without the
    /// trailing `\n` or `\r\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}
