//! Prior conversation turns, fetched once when the session starts.
//!
//! The history endpoint has answered with a bare array as well as with an object
//! wrapping it (`{"messages": [...]}` or `{"history": [...]}`); both are accepted.
//! Entries without usable text are skipped.

use crate::config::AppConfig;
use crate::error::{SessionError, SessionResult};
use crate::services::synthesis::join_url;
use crate::session::log::{Message, Role};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

#[async_trait]
pub trait ChatHistorySource: Send + Sync + 'static {
    async fn fetch(&self, user_id: Option<&str>) -> SessionResult<Vec<Message>>;
}

#[derive(Debug, Clone)]
pub struct HttpChatHistory {
    client: Client,
    url: String,
}

impl HttpChatHistory {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }

    pub fn from_config(client: Client, config: &AppConfig) -> Self {
        Self::new(client, join_url(&config.server.api_base_url, &config.http.history_path))
    }
}

#[async_trait]
impl ChatHistorySource for HttpChatHistory {
    async fn fetch(&self, user_id: Option<&str>) -> SessionResult<Vec<Message>> {
        let mut request = self.client.get(&self.url);
        if let Some(user_id) = user_id {
            request = request.query(&[("user_id", user_id)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SessionError::Http(format!(
                "history endpoint error ({}): {}",
                status, error_text
            )));
        }

        let body: Value = response.json().await?;
        let messages = parse_history(&body)?;
        debug!(count = messages.len(), "Loaded chat history");
        Ok(messages)
    }
}

/// Read history entries from either accepted response shape.
pub fn parse_history(body: &Value) -> SessionResult<Vec<Message>> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("messages").or_else(|| map.get("history")) {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(SessionError::Protocol(
                    "history response has no messages array".to_string(),
                ))
            }
        },
        _ => {
            return Err(SessionError::Protocol(
                "history response is neither an array nor an object".to_string(),
            ))
        }
    };

    Ok(entries.iter().filter_map(parse_entry).collect())
}

fn parse_entry(entry: &Value) -> Option<Message> {
    let role = match entry.get("role").and_then(Value::as_str)? {
        "user" | "human" => Role::User,
        "assistant" | "bot" | "ai" => Role::Assistant,
        "system" => Role::System,
        other => {
            warn!(role = %other, "Skipping history entry with unknown role");
            return None;
        }
    };

    let content = ["content", "message", "text"]
        .iter()
        .filter_map(|key| entry.get(*key).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())?;

    let mut message = match role {
        Role::User => Message::user(content),
        Role::Assistant => Message::assistant(content),
        Role::System => Message::system(content),
    };

    if let Some(ts) = entry
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        message.timestamp = ts.with_timezone(&Utc);
    }
    message.is_voice = entry.get("is_voice").and_then(Value::as_bool).unwrap_or(false);
    message.response_time_seconds = entry.get("response_time").and_then(Value::as_f64);
    message.token_count = entry
        .get("token_count")
        .and_then(Value::as_u64)
        .map(|n| n.min(u32::MAX as u64) as u32);

    Some(message)
}
