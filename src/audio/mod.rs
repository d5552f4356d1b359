//! # Voice Pipeline
//!
//! Microphone in, speaker out.
//!
//! ## Module Structure:
//! - **device**: capability traits for the platform recognizer and audio output
//! - **chunker**: turns recognizer results into discrete user turns
//! - **capture**: capture state machine (permission, recording, idle, error)
//! - **playback**: one-voice-at-a-time speech output
//!
//! ## Data Flow:
//! ```text
//! recognizer ──results──► capture ──► chunker ──chunk──► session controller ──► socket
//! reply text ──► playback ──synthesize──► audio output
//! ```

pub mod capture;
pub mod chunker;
pub mod device;
pub mod playback;

pub use capture::{CaptureState, VoiceCaptureController};
pub use chunker::{TranscriptChunk, TranscriptChunker};
pub use device::{AudioOutput, RecognizerSink, SpeechRecognizer};
pub use playback::{PlaybackManager, PlaybackToken};
