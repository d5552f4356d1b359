//! Everything that flows through the controller's event loop, plus what it reports
//! back to the UI.
//!
//! All asynchronous work (socket frames, permission prompts, recognizer results, timers,
//! synthesis, playback completion, typing ticks) ends as one [`ControllerEvent`] on a
//! single channel. The controller handles them one at a time, so no two handlers ever
//! interleave.

use crate::audio::capture::CaptureState;
use crate::audio::chunker::TranscriptChunk;
use crate::audio::playback::PlaybackToken;
use crate::connection::ConnectionEvent;
use crate::error::SessionResult;
use crate::session::log::Message;
use crate::session::state::{ConnectionStatus, SessionSnapshot};

use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

/// What a speech recognizer reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    Result { index: usize, chunk: TranscriptChunk },
    Error(String),
    Ended,
}

pub(crate) type Reply<T> = oneshot::Sender<SessionResult<T>>;

/// Requests from a [`SessionHandle`](crate::session::handle::SessionHandle).
#[derive(Debug)]
pub(crate) enum Command {
    SendText { text: String, reply: Reply<()> },
    StartCapture { reply: Reply<()> },
    StopCapture { reply: Reply<()> },
    SetMuted { muted: bool, reply: Reply<()> },
    SetSpeechEnabled { enabled: bool, reply: Reply<()> },
    UpdateSession { agent: String, personality: String, reply: Reply<()> },
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
    Close { reply: Reply<()> },
}

#[derive(Debug)]
pub(crate) enum ControllerEvent {
    Command(Command),
    Connection(ConnectionEvent),
    PermissionResolved { capture_id: u64, result: SessionResult<()> },
    Recognizer { capture_id: u64, event: RecognizerEvent },
    PauseElapsed { generation: u64 },
    SilenceElapsed { generation: u64 },
    Synthesized { token: PlaybackToken, result: SessionResult<Vec<u8>> },
    PlaybackFinished { token: PlaybackToken },
    TypingProgress { animation: u64, revealed: usize },
    ActivityTick { generation: u64 },
}

/// Changes the UI shell should render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    MessageAppended { message: Message },
    /// Typing animation progress for an assistant message
    MessageRevealed { id: Uuid, displayed: String, complete: bool },
    /// Busy indicator and its current activity label
    Busy { busy: bool, label: Option<String> },
    ConnectionChanged { status: ConnectionStatus },
    CaptureChanged { state: CaptureState, transcribing: bool },
    /// Live (unsent) transcript preview
    InterimTranscript { text: String },
    Speaking { speaking: bool },
    /// Microphone/recognizer problem for the voice-error indicator
    VoiceError { message: String },
    SessionUpdated { agent: String, personality: String },
}
