//! # Agent Voice Chat
//!
//! Session controller for a real-time, voice-enabled chat widget talking to an agent
//! backend over a WebSocket.
//!
//! ## Module Structure:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **error**: the crate error type and how each failure is surfaced
//! - **protocol**: JSON frames exchanged with the chat server
//! - **connection**: the persistent socket with automatic reconnect
//! - **timer**: cancellable debounce timers
//! - **audio**: speech capture, transcript chunking and speech playback
//! - **typing**: word-by-word reveal of assistant replies
//! - **services**: HTTP speech synthesis and chat history
//! - **session**: the controller, its message log and UI-facing events

pub mod audio;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod services;
pub mod session;
pub mod timer;
pub mod typing;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use error::{SessionError, SessionResult};
pub use session::{SessionController, SessionDeps, SessionHandle, UiEvent};
