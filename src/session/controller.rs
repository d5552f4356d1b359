//! # Session Controller
//!
//! The root of the voice chat widget. It owns every other component and the message log,
//! and it is the only place where their effects meet.
//!
//! ## Architecture:
//! ```text
//!  UI shell ──SessionHandle──┐
//!  socket ──ConnectionEvent──┤
//!  microphone ──Recognizer───┤──► one mpsc channel ──► SessionController::step()
//!  timers / synthesis ───────┤                           │
//!  playback / typing ticks ──┘                           ├─► MessageLog
//!                                                        ├─► SessionConnection.send
//!                                                        ├─► PlaybackManager / TypingAnimator
//!                                                        └─► UiEvent channel
//! ```
//!
//! ## Key Rust Concepts Used:
//! - **Single owner**: components are plain fields, never shared behind locks. Background
//!   tasks only post events; the loop applies them one at a time, so the order in which
//!   frames are processed is the order messages enter the log.
//! - **Trait objects for collaborators**: connector, recognizer, audio output, synthesizer
//!   and history are injected through [`SessionDeps`], so tests swap in fakes.
//! - **Errors by surface**: failures that nobody awaits are routed by
//!   [`SessionError::surface`](crate::error::SessionError::surface).

use crate::audio::capture::{CaptureState, VoiceCaptureController};
use crate::audio::chunker::ChunkerConfig;
use crate::audio::device::{AudioOutput, LoggingAudioOutput, SpeechRecognizer, UnavailableRecognizer};
use crate::audio::playback::PlaybackManager;
use crate::config::AppConfig;
use crate::connection::{Connector, ConnectionEvent, ReconnectPolicy, SessionConnection, TungsteniteConnector};
use crate::error::{ErrorSurface, SessionError, SessionResult};
use crate::protocol::{AssistantReply, InboundFrame, OutboundFrame};
use crate::services::{http_client, ChatHistorySource, HttpChatHistory, HttpSpeechSynthesizer, SpeechSynthesizer};
use crate::session::events::{Command, ControllerEvent, UiEvent};
use crate::session::handle::SessionHandle;
use crate::session::log::{Message, MessageLog};
use crate::session::state::{ActivityIndicator, ConnectionStatus, DisplayedMessage, Session, SessionSnapshot};
use crate::typing::TypingAnimator;

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// External collaborators of one session.
pub struct SessionDeps {
    pub connector: Arc<dyn Connector>,
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub output: Box<dyn AudioOutput>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Seeds the log before connecting; `None` starts with an empty log
    pub history: Option<Arc<dyn ChatHistorySource>>,
}

impl SessionDeps {
    /// Production wiring: WebSocket transport and HTTP collaborators from `config`.
    ///
    /// No platform speech engine is linked in, so voice capture reports a permission error
    /// and audio output only logs.
    pub fn from_config(config: &AppConfig) -> SessionResult<Self> {
        let client = http_client(&config.http)?;
        Ok(Self {
            connector: Arc::new(TungsteniteConnector),
            recognizer: Box::new(UnavailableRecognizer),
            output: Box::new(LoggingAudioOutput::default()),
            synthesizer: Arc::new(HttpSpeechSynthesizer::from_config(client.clone(), config)),
            history: Some(Arc::new(HttpChatHistory::from_config(client, config))),
        })
    }
}

pub struct SessionController {
    config: AppConfig,
    session: Session,
    status: ConnectionStatus,
    log: MessageLog,
    connection: SessionConnection,
    capture: VoiceCaptureController,
    playback: PlaybackManager,
    typing: TypingAnimator,
    activity: ActivityIndicator,
    history: Option<Arc<dyn ChatHistorySource>>,
    speech_enabled: bool,
    /// When the last user turn went out, for replies without `response_time`
    awaiting_reply_since: Option<Instant>,
    events_tx: UnboundedSender<ControllerEvent>,
    events_rx: UnboundedReceiver<ControllerEvent>,
    ui: UnboundedSender<UiEvent>,
    closed: bool,
}

impl SessionController {
    /// Build a controller and the stream of UI events it will produce.
    ///
    /// Nothing connects until [`start`](Self::start).
    pub fn new(config: AppConfig, deps: SessionDeps) -> (Self, UnboundedReceiver<UiEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let mut connection = SessionConnection::new(
            deps.connector,
            ReconnectPolicy::from_config(&config.connection),
            &config.session.agent,
            &config.session.personality,
        )
        .with_connect_timeout(config.connection.connect_timeout());
        let tx = events_tx.clone();
        connection.on_frame(move |event| {
            let _ = tx.send(ControllerEvent::Connection(event));
        });

        let capture = VoiceCaptureController::new(
            deps.recognizer,
            ChunkerConfig {
                pause: config.voice.pause(),
                silence: config.voice.silence(),
            },
            events_tx.clone(),
        );
        let playback = PlaybackManager::new(
            deps.synthesizer,
            deps.output,
            events_tx.clone(),
            config.http.max_speech_chars,
        );
        let typing = TypingAnimator::new(config.typing.clone(), events_tx.clone());
        let activity = ActivityIndicator::new(&config.activity, events_tx.clone());

        let controller = Self {
            session: Session::new(&config.session.agent, &config.session.personality),
            status: ConnectionStatus::Closed,
            log: MessageLog::new(config.log.max_messages),
            speech_enabled: config.voice.speech_output,
            config,
            connection,
            capture,
            playback,
            typing,
            activity,
            history: deps.history,
            awaiting_reply_since: None,
            events_tx,
            events_rx,
            ui: ui_tx,
            closed: false,
        };

        (controller, ui_rx)
    }

    /// Command handle for a UI running on another task.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.events_tx.clone())
    }

    /// Seed the log from chat history, then open the connection.
    ///
    /// A history failure is logged and the session starts with an empty log.
    pub async fn start(&mut self) {
        if let Some(history) = self.history.clone() {
            match history.fetch(self.config.session.user_id.as_deref()).await {
                Ok(messages) => {
                    info!(count = messages.len(), "Seeding message log from history");
                    for message in messages {
                        self.append(message);
                    }
                }
                Err(err) => warn!(error = %err, kind = err.kind(), "Could not load chat history"),
            }
        }

        let url = self.config.server.ws_url.clone();
        self.connection.open(&url);
    }

    /// Process events until the session is closed.
    pub async fn run(mut self) {
        while self.process_next().await {}
        info!("Session controller stopped");
    }

    /// Wait for and apply the next event. Returns `false` once the session is closed.
    pub async fn process_next(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match self.events_rx.recv().await {
            Some(event) => self.step(event),
            None => self.closed = true,
        }
        !self.closed
    }

    fn step(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Command(command) => self.handle_command(command),
            ControllerEvent::Connection(event) => self.on_connection_event(event),
            ControllerEvent::PermissionResolved { capture_id, result } => {
                if let Err(err) = self.with_capture(|c| c.on_permission(capture_id, result)) {
                    self.report(err);
                }
            }
            ControllerEvent::Recognizer { capture_id, event } => {
                match self.with_capture(|c| c.on_recognizer(capture_id, event)) {
                    Ok(step) => {
                        if let Some(text) = step.preview.clone() {
                            self.emit(UiEvent::InterimTranscript { text });
                        }
                        if let Some(chunk) = step.chunk {
                            if step.preview.is_none() {
                                self.emit(UiEvent::InterimTranscript { text: String::new() });
                            }
                            self.dispatch_voice_chunk(chunk);
                        }
                    }
                    Err(err) => self.report(err),
                }
            }
            ControllerEvent::PauseElapsed { generation } => {
                if let Some(chunk) = self.with_capture(|c| c.on_pause(generation)) {
                    // The flushed text now lives in the log, not in the live preview.
                    self.emit(UiEvent::InterimTranscript { text: String::new() });
                    self.dispatch_voice_chunk(chunk);
                }
            }
            ControllerEvent::SilenceElapsed { generation } => {
                if let Some(chunk) = self.with_capture(|c| c.on_silence(generation)) {
                    self.emit(UiEvent::InterimTranscript { text: String::new() });
                    self.dispatch_voice_chunk(chunk);
                }
            }
            ControllerEvent::Synthesized { token, result } => match self.playback.on_synthesized(token, result) {
                Ok(true) => self.emit(UiEvent::Speaking { speaking: true }),
                Ok(false) => {}
                Err(err) => {
                    self.report(err);
                    self.emit(UiEvent::Speaking { speaking: false });
                }
            },
            ControllerEvent::PlaybackFinished { token } => {
                if self.playback.on_finished(token) {
                    self.emit(UiEvent::Speaking { speaking: false });
                }
            }
            ControllerEvent::TypingProgress { animation, revealed } => {
                if let Some(reveal) = self.typing.on_progress(animation, revealed) {
                    if let Some(message) = self.log.get(reveal.message_id) {
                        let displayed = message.content.get(..reveal.visible).unwrap_or(&message.content);
                        let event = UiEvent::MessageRevealed {
                            id: reveal.message_id,
                            displayed: displayed.to_string(),
                            complete: reveal.complete,
                        };
                        self.emit(event);
                    }
                }
            }
            ControllerEvent::ActivityTick { generation } => {
                if let Some(label) = self.activity.on_tick(generation) {
                    self.emit(UiEvent::Busy { busy: true, label: Some(label) });
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendText { text, reply } => {
                let _ = reply.send(self.send_text(&text));
            }
            Command::StartCapture { reply } => {
                let _ = reply.send(self.start_capture());
            }
            Command::StopCapture { reply } => {
                let _ = reply.send(self.stop_capture());
            }
            Command::SetMuted { muted, reply } => {
                self.set_muted(muted);
                let _ = reply.send(Ok(()));
            }
            Command::SetSpeechEnabled { enabled, reply } => {
                self.set_speech_enabled(enabled);
                let _ = reply.send(Ok(()));
            }
            Command::UpdateSession { agent, personality, reply } => {
                let _ = reply.send(self.update_session(&agent, &personality));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Close { reply } => {
                self.close();
                let _ = reply.send(Ok(()));
            }
        }
    }

    // ---- operations -------------------------------------------------------------------

    /// Send a typed user turn.
    ///
    /// Fails with `Validation` for blank text and `NotConnected` while offline; in both
    /// cases nothing is appended to the log.
    pub fn send_text(&mut self, text: &str) -> SessionResult<()> {
        self.send_user_turn(text, false)
    }

    /// Send one flushed voice chunk as a user turn.
    pub fn send_voice_chunk(&mut self, text: &str) -> SessionResult<()> {
        self.send_user_turn(text, true)
    }

    /// Route one raw inbound frame. Malformed frames are logged and dropped.
    pub fn handle_inbound_frame(&mut self, raw: &str) {
        match InboundFrame::parse(raw) {
            Ok(frame) => self.route_frame(frame),
            Err(err) => warn!(error = %err, kind = err.kind(), "Ignoring malformed frame"),
        }
    }

    /// Start a capture session. Playback is stopped first.
    pub fn start_capture(&mut self) -> SessionResult<()> {
        let connected = self.is_connected();
        if connected {
            self.stop_playback();
        }

        let result = self.with_capture(|c| c.start(connected));
        if let Err(err) = &result {
            if err.surface() == ErrorSurface::VoiceError {
                self.report(err.clone());
            }
        }
        result
    }

    /// User pressed stop: send whatever is pending as the last chunk.
    pub fn stop_capture(&mut self) -> SessionResult<()> {
        match self.with_capture(|c| c.stop()) {
            Some(chunk) => self.send_voice_chunk(&chunk),
            None => Ok(()),
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        let was_speaking = self.playback.is_speaking();
        self.playback.set_muted(muted);
        info!(muted, "Speaker mute changed");
        if was_speaking && !self.playback.is_speaking() {
            self.emit(UiEvent::Speaking { speaking: false });
        }
    }

    /// Turn spoken replies on or off. Turning them off stops current playback.
    pub fn set_speech_enabled(&mut self, enabled: bool) {
        self.speech_enabled = enabled;
        if !enabled {
            self.stop_playback();
        }
    }

    /// Switch agent/personality. Sent now if connected, and after every reconnect.
    pub fn update_session(&mut self, agent: &str, personality: &str) -> SessionResult<()> {
        let agent = agent.trim();
        let personality = personality.trim();
        if agent.is_empty() || personality.is_empty() {
            return Err(SessionError::Validation(
                "agent and personality must not be empty".to_string(),
            ));
        }

        self.connection.set_profile(agent, personality);
        if self.is_connected() {
            self.connection.send(&OutboundFrame::SessionUpdate {
                agent: agent.to_string(),
                personality: personality.to_string(),
            })?;
        }

        self.session.agent = agent.to_string();
        self.session.personality = personality.to_string();
        info!(agent = %agent, personality = %personality, "Session profile updated");
        self.emit(UiEvent::SessionUpdated {
            agent: agent.to_string(),
            personality: personality.to_string(),
        });
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let messages = self
            .log
            .iter()
            .map(|message| DisplayedMessage {
                displayed: self.typing.displayed(message.id, &message.content).to_string(),
                message: message.clone(),
            })
            .collect();

        SessionSnapshot {
            session: self.session.clone(),
            connection: self.status,
            messages,
            capture: self.capture.state().clone(),
            transcribing: self.capture.is_transcribing(),
            interim_transcript: if self.capture.is_recording() {
                self.capture.preview()
            } else {
                String::new()
            },
            busy: self.activity.is_busy(),
            activity_label: self.activity.label().map(str::to_string),
            speaking: self.playback.is_speaking(),
            muted: self.playback.is_muted(),
            speech_enabled: self.speech_enabled,
        }
    }

    /// Explicit close: release microphone, speaker and socket. Terminal.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.with_capture(|c| c.abort());
        self.stop_playback();
        self.typing.cancel_running();
        self.set_busy(false);
        self.connection.close();
        self.session.connected = false;
        self.set_status(ConnectionStatus::Closed);
        self.closed = true;
        info!(session_id = ?self.session.session_id, "Session closed");
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected && self.connection.is_open()
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    // ---- inbound ----------------------------------------------------------------------

    fn route_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::Connection { session_id } => {
                if let Some(id) = session_id {
                    self.session.session_id = Some(id);
                }
                self.session.connected = true;
                info!(session_id = ?self.session.session_id, "Session acknowledged by server");

                if self.log.is_empty() {
                    let welcome = self.config.session.welcome_message.clone();
                    self.append(Message::assistant(welcome));
                }
            }
            InboundFrame::Typing { active } => self.set_busy(active),
            InboundFrame::Transcription { text, is_final } => {
                if is_final {
                    self.append(Message::voice(text));
                } else {
                    self.emit(UiEvent::InterimTranscript { text });
                }
            }
            InboundFrame::Response(reply) => self.on_reply(reply),
            InboundFrame::Error { message } => {
                self.set_busy(false);
                self.report(SessionError::Server(message));
            }
            InboundFrame::SessionUpdated { agent, personality, message } => {
                if let Some(agent) = agent {
                    self.session.agent = agent;
                }
                if let Some(personality) = personality {
                    self.session.personality = personality;
                }
                self.connection.set_profile(&self.session.agent, &self.session.personality);
                self.emit(UiEvent::SessionUpdated {
                    agent: self.session.agent.clone(),
                    personality: self.session.personality.clone(),
                });
                if let Some(message) = message {
                    self.append(Message::system(message));
                }
            }
            InboundFrame::Unknown { frame_type } => {
                debug!(frame_type = %frame_type, "Ignoring frame of unknown type");
            }
        }
    }

    fn on_reply(&mut self, reply: AssistantReply) {
        self.set_busy(false);

        let measured = self
            .awaiting_reply_since
            .take()
            .map(|since| since.elapsed().as_secs_f64());
        let response_time = reply.response_time.or(measured);

        let message = Message::assistant(reply.content)
            .with_metrics(response_time, reply.token_count)
            .with_extras(reply.products, reply.quick_actions);
        let id = message.id;
        let content = message.content.clone();
        debug!(
            response_time = ?response_time,
            token_count = ?message.token_count,
            "Assistant reply received"
        );

        // Log first: speech and animation are effects of the message, never its cause.
        self.append(message);
        self.typing.animate(id, &content);

        if self.speech_enabled {
            self.playback.speak(&content);
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connecting { attempt } => {
                if attempt == 0 {
                    self.set_status(ConnectionStatus::Connecting);
                }
            }
            ConnectionEvent::Opened => {
                self.session.connected = true;
                self.set_status(ConnectionStatus::Open);
            }
            ConnectionEvent::Frame(raw) => self.handle_inbound_frame(&raw),
            ConnectionEvent::Closed { unexpected, reason } => {
                self.session.connected = false;
                self.with_capture(|c| c.abort());
                self.set_busy(false);
                if unexpected {
                    self.report(SessionError::Connection(reason));
                } else {
                    self.set_status(ConnectionStatus::Closed);
                }
            }
            ConnectionEvent::ReconnectScheduled { attempt, delay } => {
                self.set_status(ConnectionStatus::reconnecting(attempt, delay));
            }
        }
    }

    // ---- helpers ----------------------------------------------------------------------

    fn send_user_turn(&mut self, text: &str, is_voice: bool) -> SessionResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::Validation("message cannot be empty".to_string()));
        }
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        self.connection.send(&OutboundFrame::Message {
            message: text.to_string(),
            session_id: self.session.session_id.clone(),
            user_id: self.config.session.user_id.clone(),
            max_tokens: self.config.session.max_tokens,
        })?;

        self.awaiting_reply_since = Some(Instant::now());
        let message = if is_voice { Message::voice(text) } else { Message::user(text) };
        self.append(message);
        Ok(())
    }

    fn dispatch_voice_chunk(&mut self, chunk: String) {
        info!(chars = chunk.len(), "Sending voice chunk");
        if let Err(err) = self.send_voice_chunk(&chunk) {
            warn!(error = %err, "Voice chunk could not be sent");
        }
    }

    fn append(&mut self, message: Message) {
        if let Some(evicted) = self.log.append(message.clone()) {
            self.typing.forget(evicted.id);
        }
        self.emit(UiEvent::MessageAppended { message });
    }

    fn set_busy(&mut self, busy: bool) {
        let changed = if busy { self.activity.start() } else { self.activity.stop() };
        if changed {
            let label = self.activity.label().map(str::to_string);
            self.emit(UiEvent::Busy { busy, label });
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.emit(UiEvent::ConnectionChanged { status });
        }
    }

    fn stop_playback(&mut self) {
        let was_speaking = self.playback.is_speaking();
        self.playback.stop_current();
        if was_speaking {
            self.emit(UiEvent::Speaking { speaking: false });
        }
    }

    /// Run `f` on the capture controller and report any visible state change.
    fn with_capture<R>(&mut self, f: impl FnOnce(&mut VoiceCaptureController) -> R) -> R {
        let before: (CaptureState, bool) = (self.capture.state().clone(), self.capture.is_transcribing());
        let result = f(&mut self.capture);
        let after = (self.capture.state().clone(), self.capture.is_transcribing());
        if before != after {
            self.emit(UiEvent::CaptureChanged {
                state: after.0,
                transcribing: after.1,
            });
        }
        result
    }

    /// Present an error nobody is awaiting, according to its surface.
    fn report(&mut self, err: SessionError) {
        match err.surface() {
            ErrorSurface::Indicator => info!(error = %err, "Connection interrupted, will reconnect"),
            ErrorSurface::VoiceError => {
                error!(error = %err, kind = err.kind(), "Voice capture failed");
                self.emit(UiEvent::VoiceError { message: err.to_string() });
            }
            ErrorSurface::LogOnly => warn!(error = %err, kind = err.kind(), "Recovered locally"),
            ErrorSurface::ChatMessage => {
                warn!(error = %err, "Server reported an error");
                let text = match err {
                    SessionError::Server(message) => message,
                    other => other.to_string(),
                };
                self.append(Message::system(text));
            }
            ErrorSurface::Caller => debug!(error = %err, "Error returned to caller"),
        }
    }

    fn emit(&self, event: UiEvent) {
        // No UI listening is not an error; the controller keeps working headless.
        let _ = self.ui.send(event);
    }
}
