//! # Message Log
//!
//! Ordered record of the conversation shown in the chat widget.
//!
//! ## Rules:
//! - Append-only, in the order frames are processed
//! - Capped: past `max_messages` the oldest entry is evicted, the rest keep their order
//! - Messages never change once appended. The typing animation shows a prefix of an
//!   assistant message, but that prefix is derived, the stored content stays complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One chat entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_voice: bool,
    pub response_time_seconds: Option<f64>,
    pub token_count: Option<u32>,
    /// Product cards attached to an assistant reply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_actions: Vec<Value>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_voice: false,
            response_time_seconds: None,
            token_count: None,
            products: Vec::new(),
            quick_actions: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// User turn that came from the microphone.
    pub fn voice(content: impl Into<String>) -> Self {
        Self {
            is_voice: true,
            ..Self::new(Role::User, content)
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn with_metrics(mut self, response_time_seconds: Option<f64>, token_count: Option<u32>) -> Self {
        self.response_time_seconds = response_time_seconds;
        self.token_count = token_count;
        self
    }

    pub fn with_extras(mut self, products: Vec<Value>, quick_actions: Vec<Value>) -> Self {
        self.products = products;
        self.quick_actions = quick_actions;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Append and return the evicted message, if the cap was reached.
    pub fn append(&mut self, message: Message) -> Option<Message> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Appending the 101st message to a log capped at 100 evicts only the oldest.
    #[test]
    fn test_cap_evicts_oldest_and_keeps_order() {
        let mut log = MessageLog::new(100);
        for i in 0..100 {
            assert!(log.append(Message::user(format!("m{}", i))).is_none());
        }

        let evicted = log.append(Message::user("m100")).unwrap();
        assert_eq!(evicted.content, "m0");
        assert_eq!(log.len(), 100);

        let contents: Vec<_> = log.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (1..=100).map(|i| format!("m{}", i)).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_message_constructors() {
        let voice = Message::voice("turn on lights");
        assert_eq!(voice.role, Role::User);
        assert!(voice.is_voice);

        let reply = Message::assistant("ok")
            .with_metrics(Some(0.8), Some(4))
            .with_extras(vec![serde_json::json!({"sku": "A1"})], Vec::new());
        assert_eq!(reply.response_time_seconds, Some(0.8));
        assert_eq!(reply.products.len(), 1);
        assert_ne!(voice.id, reply.id);
    }

    #[test]
    fn test_lookup_and_serialization() {
        let mut log = MessageLog::new(3);
        let message = Message::system("Connection lost");
        let id = message.id;
        log.append(message);
        assert_eq!(log.get(id).map(|m| m.role), Some(Role::System));

        let json = serde_json::to_value(log.last().unwrap()).unwrap();
        assert_eq!(json["role"], "system");
        assert!(json.get("products").is_none());
    }
}
