//! # Chat Session Wire Protocol
//!
//! JSON frames exchanged with the chat server over the session WebSocket.
//!
//! ## Message Format:
//! - **Client → Server**: `session_update` (agent/personality) and `message` (one user turn)
//! - **Server → Client**: `connection`, `typing`, `transcription`, `response`/`message`,
//!   `error`, `session_updated`
//!
//! ## Lenient parsing
//! Servers in the wild send more than one shape for several frames (`typing` carries
//! either `status: "start" | "stop"` or `typing: bool`; the reply text lives in either
//! `content` or `message`; error text in `message`, `error` or `detail`). Inbound frames
//! are therefore read field by field from a `serde_json::Value` instead of through a
//! strict derive, so an unusual-but-valid frame never gets dropped. Outbound frames are
//! ours to shape and use a tagged serde enum.

use crate::error::{SessionError, SessionResult};
use serde::Serialize;
use serde_json::Value;

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Selects the agent and personality the server should answer with
    SessionUpdate { agent: String, personality: String },

    /// One user turn (typed text or a flushed voice chunk)
    Message {
        message: String,
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
    },
}

impl OutboundFrame {
    pub fn to_json(&self) -> SessionResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Assistant reply carried by a `response` or `message` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub content: String,
    pub response_time: Option<f64>,
    pub token_count: Option<u32>,
    pub products: Vec<Value>,
    pub quick_actions: Vec<Value>,
}

/// Frames the server sends, after normalising the observed variants.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Connection acknowledged; the server issued a session id
    Connection { session_id: Option<String> },
    /// Assistant started (`true`) or stopped (`false`) working on a reply
    Typing { active: bool },
    /// Server-side speech recognition result
    Transcription { text: String, is_final: bool },
    Response(AssistantReply),
    Error { message: String },
    SessionUpdated {
        agent: Option<String>,
        personality: Option<String>,
        message: Option<String>,
    },
    /// Well-formed frame with a `type` this client does not handle
    Unknown { frame_type: String },
}

impl InboundFrame {
    /// Parse one text frame.
    ///
    /// ## Returns:
    /// - **Ok(frame)**: Any JSON object with a string `type` (unknown types included)
    /// - **Err(SessionError::Protocol)**: Not JSON, not an object, no `type`, or a known
    ///   type missing its required payload
    pub fn parse(raw: &str) -> SessionResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Protocol("frame has no string `type` field".to_string()))?;

        let frame = match frame_type {
            "connection" => InboundFrame::Connection {
                session_id: string_field(&value, &["session_id"]),
            },
            "typing" => InboundFrame::Typing {
                active: parse_typing(&value)?,
            },
            "transcription" => InboundFrame::Transcription {
                text: string_field(&value, &["text"]).ok_or_else(|| {
                    SessionError::Protocol("transcription frame without text".to_string())
                })?,
                is_final: bool_field(&value, &["isFinal", "is_final"]).unwrap_or(false),
            },
            "response" | "message" => {
                let content = string_field(&value, &["content", "message"]).ok_or_else(|| {
                    SessionError::Protocol(format!("{} frame without content", frame_type))
                })?;
                InboundFrame::Response(AssistantReply {
                    content,
                    response_time: number_field(&value, "response_time"),
                    token_count: number_field(&value, "token_count").map(|n| n.max(0.0) as u32),
                    products: array_field(&value, "products"),
                    quick_actions: array_field(&value, "quick_actions"),
                })
            }
            "error" => InboundFrame::Error {
                message: string_field(&value, &["message", "error", "detail"])
                    .unwrap_or_else(|| "Unknown server error".to_string()),
            },
            "session_updated" => InboundFrame::SessionUpdated {
                agent: string_field(&value, &["agent"]),
                personality: string_field(&value, &["personality"]),
                message: string_field(&value, &["message"]),
            },
            other => InboundFrame::Unknown {
                frame_type: other.to_string(),
            },
        };

        Ok(frame)
    }
}

/// Accept both `status: "start" | "stop"` and `typing: bool`.
fn parse_typing(value: &Value) -> SessionResult<bool> {
    if let Some(active) = value.get("typing").and_then(Value::as_bool) {
        return Ok(active);
    }

    match value.get("status").and_then(Value::as_str) {
        Some("start") => Ok(true),
        Some("stop") => Ok(false),
        Some(other) => Err(SessionError::Protocol(format!(
            "unknown typing status '{}'",
            other
        ))),
        None => Err(SessionError::Protocol(
            "typing frame without status or typing flag".to_string(),
        )),
    }
}

/// First non-empty string among `keys`.
fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn bool_field(value: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_bool))
}

/// Numbers sometimes arrive as strings ("1.42").
fn number_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn array_field(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
