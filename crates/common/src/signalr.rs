//! SignalR JSON hub protocol framing.
//!
//! Every record on the wire is a JSON document terminated by the ASCII record
//! separator (`0x1E`). A single WebSocket text frame may carry several records.

use crate::error::{Error, Result};
use crate::messages::Invocation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record terminator used by the JSON hub protocol.
pub const RECORD_SEPARATOR: char = '\u{001e}';

const INVOCATION: u64 = 1;
const STREAM_ITEM: u64 = 2;
const COMPLETION: u64 = 3;
const PING: u64 = 6;
const CLOSE: u64 = 7;

/// A decoded hub record.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Server-to-client method call, e.g. `GatewayTrade`.
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of a client invocation.
    Completion {
        invocation_id: String,
        error: Option<String>,
    },
    Ping,
    /// Server is closing the connection.
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Record types the bridge has no use for (stream items, cancel, ...).
    Other(u64),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(rename = "type")]
    kind: Option<u64>,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    invocation_id: Option<String>,
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundInvocation<'a> {
    #[serde(rename = "type")]
    kind: u64,
    invocation_id: String,
    target: &'a str,
    arguments: &'a [Value],
}

/// Handshake selecting the JSON protocol, version 1.
pub fn handshake_request() -> String {
    format!(
        "{}{}",
        serde_json::json!({"protocol": "json", "version": 1}),
        RECORD_SEPARATOR
    )
}

/// Keepalive record.
pub fn ping_frame() -> String {
    format!("{}{}", serde_json::json!({"type": PING}), RECORD_SEPARATOR)
}

/// Encode a client invocation with the given id.
pub fn encode_invocation(invocation_id: u64, invocation: &Invocation) -> Result<String> {
    let record = OutboundInvocation {
        kind: INVOCATION,
        invocation_id: invocation_id.to_string(),
        target: &invocation.target,
        arguments: &invocation.arguments,
    };
    Ok(format!("{}{}", serde_json::to_string(&record)?, RECORD_SEPARATOR))
}

/// Split a text frame into its non-empty records.
pub fn split_records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

/// Check the server's handshake reply. `{}` means accepted.
pub fn parse_handshake_response(record: &str) -> Result<()> {
    let raw: RawRecord = serde_json::from_str(record)?;
    match raw.error {
        Some(error) => Err(Error::Connect(format!("handshake rejected: {}", error))),
        None => Ok(()),
    }
}

/// Decode a single record.
pub fn parse_message(record: &str) -> Result<HubMessage> {
    let raw: RawRecord = serde_json::from_str(record)?;
    let message = match raw.kind {
        Some(INVOCATION) => match raw.target {
            Some(target) => HubMessage::Invocation {
                target,
                arguments: raw.arguments,
            },
            None => HubMessage::Other(INVOCATION),
        },
        Some(COMPLETION) => HubMessage::Completion {
            invocation_id: raw.invocation_id.unwrap_or_default(),
            error: raw.error,
        },
        Some(PING) => HubMessage::Ping,
        Some(CLOSE) => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        Some(STREAM_ITEM) => HubMessage::Other(STREAM_ITEM),
        Some(other) => HubMessage::Other(other),
        None => HubMessage::Other(0),
    };
    Ok(message)
}
