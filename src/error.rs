//! # Error Handling
//!
//! This module defines the single error type shared by every part of the voice chat
//! session controller, and how each kind of failure is presented to the user.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces callers to handle both success and failure cases
//! - **No exceptions**: A failed `send` comes back as `Err(SessionError::NotConnected)`,
//!   it never unwinds through the event loop
//!
//! ### Enums for Error Types
//! - **Variants**: Each variant is one class of failure (connection, permission, synthesis...)
//! - **Data**: Most variants carry a human-readable detail message
//!
//! ### Traits for Error Conversion
//! - **From trait**: Library errors (serde_json, config, reqwest, tungstenite) convert
//!   automatically so `?` works everywhere
//! - **Display trait**: Defines how errors are formatted in logs and system messages
//!
//! ## Error taxonomy
//! No error in this crate terminates a session. Each class is either recovered
//! automatically, shown as a transient indicator, shown as a chat message, or only
//! logged. [`SessionError::surface`] encodes that mapping in one place.

use std::fmt;

/// Every failure the session controller and its components can report.
///
/// ## Usage Example:
/// ```rust
/// use agent_voice_chat::error::SessionError;
/// let err = SessionError::Permission("microphone denied".to_string());
/// assert_eq!(err.to_string(), "Permission error: microphone denied");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// `send` was attempted while the socket was not `Open`
    NotConnected,

    /// Socket closed, refused, or otherwise unreachable
    Connection(String),

    /// Microphone permission was denied
    Permission(String),

    /// Capture device or recognizer failed after permission was granted
    Device(String),

    /// Speech synthesis request failed or returned unusable audio
    Synthesis(String),

    /// Malformed or unexpected inbound frame
    Protocol(String),

    /// Explicit `error` frame sent by the server
    Server(String),

    /// Configuration file or environment variable problems
    Config(String),

    /// Caller input rejected before anything was sent
    Validation(String),

    /// HTTP collaborator (history, synthesis transport) failed
    Http(String),

    /// The controller event loop has shut down
    Closed,
}

/// Where an error is shown, following the session's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSurface {
    /// Transient "reconnecting" indicator; recovered automatically
    Indicator,
    /// Visible voice-error state on the microphone control
    VoiceError,
    /// Written to the log only
    LogOnly,
    /// Appended to the chat log as a system message
    ChatMessage,
    /// Returned to whoever called the operation
    Caller,
}

impl SessionError {
    /// Map this error to the place the user sees it.
    pub fn surface(&self) -> ErrorSurface {
        match self {
            SessionError::Connection(_) => ErrorSurface::Indicator,
            SessionError::Permission(_) | SessionError::Device(_) => ErrorSurface::VoiceError,
            SessionError::Synthesis(_) | SessionError::Protocol(_) | SessionError::Http(_) => {
                ErrorSurface::LogOnly
            }
            SessionError::Server(_) => ErrorSurface::ChatMessage,
            SessionError::NotConnected
            | SessionError::Config(_)
            | SessionError::Validation(_)
            | SessionError::Closed => ErrorSurface::Caller,
        }
    }

    /// Short machine-readable name, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NotConnected => "not_connected",
            SessionError::Connection(_) => "connection_error",
            SessionError::Permission(_) => "permission_error",
            SessionError::Device(_) => "device_error",
            SessionError::Synthesis(_) => "synthesis_error",
            SessionError::Protocol(_) => "protocol_error",
            SessionError::Server(_) => "server_error",
            SessionError::Config(_) => "config_error",
            SessionError::Validation(_) => "validation_error",
            SessionError::Http(_) => "http_error",
            SessionError::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotConnected => write!(f, "Not connected to the chat server"),
            SessionError::Connection(msg) => write!(f, "Connection error: {}", msg),
            SessionError::Permission(msg) => write!(f, "Permission error: {}", msg),
            SessionError::Device(msg) => write!(f, "Device error: {}", msg),
            SessionError::Synthesis(msg) => write!(f, "Speech synthesis error: {}", msg),
            SessionError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SessionError::Server(msg) => write!(f, "Server error: {}", msg),
            SessionError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SessionError::Validation(msg) => write!(f, "Validation error: {}", msg),
            SessionError::Http(msg) => write!(f, "HTTP error: {}", msg),
            SessionError::Closed => write!(f, "Session controller has shut down"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Malformed JSON on the wire is a protocol problem, never a crash.
impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Protocol(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for SessionError {
    fn from(err: config::ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Connection(err.to_string())
    }
}

/// Type alias for Results that use the session error type.
pub type SessionResult<T> = Result<T, SessionError>;
