//! # Voice Capture Controller
//!
//! Owns the microphone for the session and runs the capture state machine:
//!
//! ```text
//! Idle ──start()──► RequestingPermission ──granted──► Recording ──silence/stop()──► Idle
//!   ▲                      │ denied                       │ device error
//!   │                      ▼                              ▼
//!   └──── start() ◄───── Error ◄──────────────────────────┘
//! ```
//!
//! "Transcribing" is not a state: it is true whenever the chunker holds unflushed final
//! text, which only happens while `Recording`.
//!
//! ## Timers
//! Pause and silence timers are armed when recording begins and re-armed by every
//! recognizer result. Their events come back through the controller's event loop carrying
//! the chunker generation they were armed with.

use crate::audio::chunker::{ChunkerConfig, TranscriptChunker};
use crate::audio::device::{RecognizerSink, SpeechRecognizer};
use crate::error::{SessionError, SessionResult};
use crate::session::events::{ControllerEvent, RecognizerEvent};
use crate::timer::DebounceTimer;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    RequestingPermission,
    Recording,
    Error(String),
}

/// What one recognizer event produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureStep {
    /// Text to send as one user turn
    pub chunk: Option<String>,
    /// Updated live preview (finals so far plus the interim guess)
    pub preview: Option<String>,
}

pub struct VoiceCaptureController {
    recognizer: Box<dyn SpeechRecognizer>,
    chunker: TranscriptChunker,
    pause_timer: DebounceTimer,
    silence_timer: DebounceTimer,
    events: UnboundedSender<ControllerEvent>,
    state: CaptureState,
    permission_granted: bool,
    capture_id: u64,
}

impl VoiceCaptureController {
    pub(crate) fn new(
        recognizer: Box<dyn SpeechRecognizer>,
        config: ChunkerConfig,
        events: UnboundedSender<ControllerEvent>,
    ) -> Self {
        Self {
            recognizer,
            chunker: TranscriptChunker::new(config),
            pause_timer: DebounceTimer::new(),
            silence_timer: DebounceTimer::new(),
            events,
            state: CaptureState::Idle,
            permission_granted: false,
            capture_id: 0,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    pub fn is_transcribing(&self) -> bool {
        self.is_recording() && self.chunker.has_pending()
    }

    pub fn permission_granted(&self) -> bool {
        self.permission_granted
    }

    pub fn preview(&self) -> String {
        self.chunker.preview()
    }

    /// Begin a capture session.
    ///
    /// Refused with `NotConnected` while the session is offline. Asks for permission the
    /// first time; afterwards recording starts immediately. Calling it while already
    /// recording or waiting for permission does nothing.
    pub fn start(&mut self, connected: bool) -> SessionResult<()> {
        if !connected {
            return Err(SessionError::NotConnected);
        }

        if matches!(self.state, CaptureState::Recording | CaptureState::RequestingPermission) {
            debug!(state = ?self.state, "Capture already active");
            return Ok(());
        }

        self.capture_id += 1;

        if self.permission_granted {
            return self.begin_recording();
        }

        info!("Requesting microphone permission");
        self.state = CaptureState::RequestingPermission;

        let capture_id = self.capture_id;
        let events = self.events.clone();
        let permission = self.recognizer.request_permission();
        tokio::spawn(async move {
            let result = permission.await;
            let _ = events.send(ControllerEvent::PermissionResolved { capture_id, result });
        });

        Ok(())
    }

    /// Permission prompt resolved.
    pub fn on_permission(&mut self, capture_id: u64, result: SessionResult<()>) -> SessionResult<()> {
        if capture_id != self.capture_id || self.state != CaptureState::RequestingPermission {
            debug!(capture_id, "Ignoring permission result for an abandoned capture");
            return Ok(());
        }

        match result {
            Ok(()) => {
                self.permission_granted = true;
                self.begin_recording()
            }
            Err(err) => {
                let err = match err {
                    SessionError::Permission(_) => err,
                    other => SessionError::Permission(other.to_string()),
                };
                warn!(error = %err, "Microphone permission denied");
                self.state = CaptureState::Error(err.to_string());
                Err(err)
            }
        }
    }

    /// One event from the recognizer.
    pub fn on_recognizer(&mut self, capture_id: u64, event: RecognizerEvent) -> SessionResult<CaptureStep> {
        if capture_id != self.capture_id || !self.is_recording() {
            debug!(capture_id, "Ignoring recognizer event outside an active capture");
            return Ok(CaptureStep::default());
        }

        match event {
            RecognizerEvent::Result { index, chunk } => {
                let generation = self.chunker.ingest(index, chunk);
                self.arm_timers(generation);
                Ok(CaptureStep {
                    chunk: None,
                    preview: Some(self.chunker.preview()),
                })
            }
            RecognizerEvent::Error(message) => {
                error!(error = %message, "Speech recognizer failed");
                self.fail(message.clone());
                Err(SessionError::Device(message))
            }
            RecognizerEvent::Ended => {
                debug!("Recognizer ended on its own");
                let chunk = self.chunker.flush();
                self.finish();
                Ok(CaptureStep { chunk, preview: None })
            }
        }
    }

    /// Pause timer fired: flush one turn, keep recording.
    pub fn on_pause(&mut self, generation: u64) -> Option<String> {
        if !self.is_recording() || generation != self.chunker.generation() {
            return None;
        }

        let folded = self.chunker.has_folded_results();
        let chunk = self.chunker.pause_elapsed(generation);
        if folded {
            // The chunker restarted numbering, the recognizer must too.
            self.recognizer.reset();
        }
        chunk
    }

    /// Silence timer fired: flush what is left and stop capture.
    pub fn on_silence(&mut self, generation: u64) -> Option<String> {
        if !self.is_recording() {
            return None;
        }

        let stop = self.chunker.silence_elapsed(generation)?;
        info!("Silence detected, stopping capture");
        self.finish();
        stop.flushed
    }

    /// User-initiated stop. Returns the last chunk to send, if any.
    pub fn stop(&mut self) -> Option<String> {
        match self.state {
            CaptureState::Recording => {
                let chunk = self.chunker.flush();
                self.finish();
                chunk
            }
            CaptureState::RequestingPermission => {
                // A later permission result for this capture is now stale.
                self.capture_id += 1;
                self.state = CaptureState::Idle;
                None
            }
            CaptureState::Error(_) => {
                self.state = CaptureState::Idle;
                None
            }
            CaptureState::Idle => None,
        }
    }

    /// Drop the capture without sending anything (connection lost).
    pub fn abort(&mut self) {
        if self.state == CaptureState::Idle {
            return;
        }
        if self.is_recording() {
            warn!("Aborting capture, pending speech discarded");
            self.recognizer.stop();
        }
        self.capture_id += 1;
        self.cancel_timers();
        self.chunker.cancel();
        self.state = CaptureState::Idle;
    }

    fn begin_recording(&mut self) -> SessionResult<()> {
        let generation = self.chunker.begin();
        let sink = RecognizerSink::new(self.events.clone(), self.capture_id);

        if let Err(err) = self.recognizer.start(sink) {
            error!(error = %err, "Could not start speech recognizer");
            self.fail(err.to_string());
            return Err(err);
        }

        info!(capture_id = self.capture_id, "Recording started");
        self.state = CaptureState::Recording;
        self.arm_timers(generation);
        Ok(())
    }

    fn arm_timers(&mut self, generation: u64) {
        let config = self.chunker.config();
        self.pause_timer
            .arm(config.pause, &self.events, ControllerEvent::PauseElapsed { generation });
        self.silence_timer
            .arm(config.silence, &self.events, ControllerEvent::SilenceElapsed { generation });
    }

    fn cancel_timers(&mut self) {
        self.pause_timer.cancel();
        self.silence_timer.cancel();
    }

    fn finish(&mut self) {
        self.recognizer.stop();
        self.cancel_timers();
        self.chunker.cancel();
        self.state = CaptureState::Idle;
    }

    fn fail(&mut self, reason: String) {
        self.recognizer.stop();
        self.cancel_timers();
        self.chunker.cancel();
        self.state = CaptureState::Error(reason);
    }
}
