//! # Chat Session
//!
//! The controller that ties connection, voice capture, playback and typing together,
//! plus the data it owns (session identity, message log) and the events it exchanges
//! with the UI.

pub mod controller;
pub mod events;
pub mod handle;
pub mod log;
pub mod state;

pub use controller::{SessionController, SessionDeps};
pub use events::UiEvent;
pub use handle::SessionHandle;
pub use log::{Message, MessageLog, Role};
pub use state::{ConnectionStatus, Session, SessionSnapshot};
