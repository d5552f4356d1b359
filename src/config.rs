//! # Configuration Management
//!
//! This module handles loading and managing the voice chat configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization between Rust structs and TOML/env data
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **Duration accessors**: Config stores plain milliseconds, callers get `std::time::Duration`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `CHAT_WS_URL` / `CHAT_API_URL` (deployment shortcuts)
//! 2. Environment variables (APP_VOICE__PAUSE_MS, APP_SESSION__AGENT, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main configuration that contains all settings for one chat widget session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub connection: ConnectionConfig,
    pub voice: VoiceConfig,
    pub typing: TypingConfig,
    pub activity: ActivityConfig,
    pub log: LogConfig,
    pub http: HttpConfig,
}

/// Where the chat backend lives.
///
/// ## Fields:
/// - `ws_url`: WebSocket endpoint carrying the JSON session protocol
/// - `api_base_url`: Base URL for the HTTP collaborators (speech synthesis, history)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub ws_url: String,
    pub api_base_url: String,
}

/// Conversation identity sent to the server.
///
/// `agent` and `personality` go out in every `session_update` frame, including the
/// one sent automatically after each (re)connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub agent: String,
    pub personality: String,
    pub user_id: Option<String>,
    pub max_tokens: Option<u32>,
    pub welcome_message: String,
}

/// Reconnect strategy after an unexpected socket closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every attempt
    Fixed,
    /// Delay doubles per consecutive attempt, capped at `max_reconnect_delay_ms`
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub reconnect_delay_ms: u64,
    pub backoff: Backoff,
    pub max_reconnect_delay_ms: u64,
    /// A handshake that has not completed within this window counts as a failed attempt
    pub connect_timeout_ms: u64,
}

/// Speech capture and speech output settings.
///
/// ## Fields:
/// - `pause_ms`: Quiet time after which accumulated text is sent as one turn
/// - `silence_ms`: Quiet time after which the microphone closes entirely
/// - `speech_output`: Whether assistant replies are spoken aloud
///
/// ## Tuning guidelines:
/// `silence_ms` must be at least `pause_ms`, otherwise capture could stop before
/// the pause flush had a chance to send the last sentence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub pause_ms: u64,
    pub silence_ms: u64,
    pub speech_output: bool,
}

/// Human-like reveal cadence for assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    pub min_word_delay_ms: u64,
    pub max_word_delay_ms: u64,
    pub sentence_pause_ms: u64,
}

/// Rotating "activity" label shown while the assistant is busy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    pub labels: Vec<String>,
    pub rotate_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Oldest messages are evicted past this many entries
    pub max_messages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub synthesis_path: String,
    pub history_path: String,
    /// Longer replies are truncated before synthesis
    pub max_speech_chars: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ws_url: "ws://127.0.0.1:8000/ws/chat".to_string(),
                api_base_url: "http://127.0.0.1:8000/api".to_string(),
            },
            session: SessionConfig {
                agent: "general".to_string(),
                personality: "friendly".to_string(),
                user_id: None,
                max_tokens: None,
                welcome_message: "Hi! How can I help you today?".to_string(),
            },
            connection: ConnectionConfig {
                reconnect_delay_ms: 3000, // flat retry
                backoff: Backoff::Fixed,
                max_reconnect_delay_ms: 30_000,
                connect_timeout_ms: 10_000,
            },
            voice: VoiceConfig {
                pause_ms: 2000,
                silence_ms: 2000,
                speech_output: true,
            },
            typing: TypingConfig {
                min_word_delay_ms: 50,
                max_word_delay_ms: 150,
                sentence_pause_ms: 300,
            },
            activity: ActivityConfig {
                labels: vec![
                    "Thinking".to_string(),
                    "Looking that up".to_string(),
                    "Putting an answer together".to_string(),
                ],
                rotate_ms: 2000,
            },
            log: LogConfig { max_messages: 100 },
            http: HttpConfig {
                timeout_secs: 30,
                synthesis_path: "/tts".to_string(),
                history_path: "/chat/history".to_string(),
                max_speech_chars: 1200,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the `CHAT_WS_URL` / `CHAT_API_URL` shortcuts
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__WS_URL=wss://chat.example.com/ws`
    /// - `APP_VOICE__SILENCE_MS=4000`
    /// - `APP_CONNECTION__BACKOFF=exponential`
    pub fn load() -> SessionResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        if let Ok(url) = env::var("CHAT_WS_URL") {
            settings = settings.set_override("server.ws_url", url)?;
        }

        if let Ok(url) = env::var("CHAT_API_URL") {
            settings = settings.set_override("server.api_base_url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Both server URLs are set
    /// - Reconnect delay is not zero (a zero delay would spin against a dead server)
    /// - Connect timeout is not zero
    /// - Pause is not zero and silence is not shorter than pause
    /// - Word delay range is ordered
    /// - The message log can hold at least one message
    pub fn validate(&self) -> SessionResult<()> {
        if self.server.ws_url.trim().is_empty() {
            return Err(SessionError::Config("WebSocket URL cannot be empty".to_string()));
        }

        if self.server.api_base_url.trim().is_empty() {
            return Err(SessionError::Config("API base URL cannot be empty".to_string()));
        }

        if self.connection.reconnect_delay_ms == 0 {
            return Err(SessionError::Config(
                "Reconnect delay must be greater than 0".to_string(),
            ));
        }

        if self.connection.max_reconnect_delay_ms < self.connection.reconnect_delay_ms {
            return Err(SessionError::Config(
                "Max reconnect delay cannot be shorter than the base delay".to_string(),
            ));
        }

        if self.connection.connect_timeout_ms == 0 {
            return Err(SessionError::Config(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.voice.pause_ms == 0 {
            return Err(SessionError::Config("Pause duration must be greater than 0".to_string()));
        }

        if self.voice.silence_ms < self.voice.pause_ms {
            return Err(SessionError::Config(format!(
                "Silence duration ({}ms) must be at least the pause duration ({}ms)",
                self.voice.silence_ms, self.voice.pause_ms
            )));
        }

        if self.typing.min_word_delay_ms > self.typing.max_word_delay_ms {
            return Err(SessionError::Config(
                "Minimum word delay cannot exceed maximum word delay".to_string(),
            ));
        }

        if self.activity.labels.is_empty() || self.activity.rotate_ms == 0 {
            return Err(SessionError::Config(
                "Activity indicator needs at least one label and a rotation interval".to_string(),
            ));
        }

        if self.log.max_messages == 0 {
            return Err(SessionError::Config(
                "Message log must hold at least one message".to_string(),
            ));
        }

        Ok(())
    }
}

impl ConnectionConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl VoiceConfig {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }
}

impl TypingConfig {
    pub fn sentence_pause(&self) -> Duration {
        Duration::from_millis(self.sentence_pause_ms)
    }
}

impl ActivityConfig {
    pub fn rotate_every(&self) -> Duration {
        Duration::from_millis(self.rotate_ms)
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
