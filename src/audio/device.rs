//! # Audio Device Capabilities
//!
//! The controller never talks to a microphone or speaker directly. It goes through two
//! capability traits that any platform can implement:
//!
//! - [`SpeechRecognizer`]: asks for microphone permission, then streams recognizer
//!   results into a [`RecognizerSink`] until it is stopped
//! - [`AudioOutput`]: plays one synthesized clip and reports natural completion through
//!   a [`PlaybackNotifier`]
//!
//! ## Key Rust Concepts Used:
//! - **Trait objects**: `Box<dyn SpeechRecognizer>` so the platform is picked at runtime
//! - **BoxFuture**: permission prompts are asynchronous but the trait stays object safe
//! - **Channel-backed callbacks**: sinks post into the controller's event loop instead of
//!   calling back into it, so no component ever reaches into another's state

use crate::audio::chunker::TranscriptChunk;
use crate::audio::playback::PlaybackToken;
use crate::error::{SessionError, SessionResult};
use crate::session::events::{ControllerEvent, RecognizerEvent};

use futures_util::future::{self, BoxFuture};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a recognizer delivers its results for one capture session.
///
/// Every sink is bound to the capture that created it; events from an old capture that
/// arrive after a restart are discarded by the controller.
#[derive(Debug, Clone)]
pub struct RecognizerSink {
    tx: UnboundedSender<ControllerEvent>,
    capture_id: u64,
}

impl RecognizerSink {
    pub(crate) fn new(tx: UnboundedSender<ControllerEvent>, capture_id: u64) -> Self {
        Self { tx, capture_id }
    }

    /// Deliver one result. `index` is the result's position since the last start/reset.
    ///
    /// Returns `false` once the controller is gone.
    pub fn result(&self, index: usize, chunk: TranscriptChunk) -> bool {
        self.post(RecognizerEvent::Result { index, chunk })
    }

    /// The device failed mid-capture.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.post(RecognizerEvent::Error(message.into()))
    }

    /// The recognizer stopped on its own (platform timeout, device unplugged cleanly).
    pub fn ended(&self) -> bool {
        self.post(RecognizerEvent::Ended)
    }

    fn post(&self, event: RecognizerEvent) -> bool {
        self.tx
            .send(ControllerEvent::Recognizer {
                capture_id: self.capture_id,
                event,
            })
            .is_ok()
    }
}

/// Speech-to-text feed.
pub trait SpeechRecognizer: Send {
    /// Ask for microphone access. Resolves once the platform (or user) decides.
    fn request_permission(&mut self) -> BoxFuture<'static, SessionResult<()>>;

    /// Begin streaming results into `sink`. Result numbering starts at 0.
    fn start(&mut self, sink: RecognizerSink) -> SessionResult<()>;

    /// Restart result numbering without releasing the device.
    fn reset(&mut self);

    /// Stop streaming and release the device.
    fn stop(&mut self);
}

/// Reports natural completion of one clip.
#[derive(Debug)]
pub struct PlaybackNotifier {
    tx: UnboundedSender<ControllerEvent>,
    token: PlaybackToken,
}

impl PlaybackNotifier {
    pub(crate) fn new(tx: UnboundedSender<ControllerEvent>, token: PlaybackToken) -> Self {
        Self { tx, token }
    }

    pub fn token(&self) -> PlaybackToken {
        self.token
    }

    pub fn finished(self) {
        let _ = self.tx.send(ControllerEvent::PlaybackFinished { token: self.token });
    }
}

/// Single audio output element.
pub trait AudioOutput: Send {
    /// Start playing `audio`. Call `done.finished()` when it ends by itself.
    fn play(&mut self, token: PlaybackToken, audio: Vec<u8>, done: PlaybackNotifier) -> SessionResult<()>;

    /// Interrupt `token` and release whatever it holds. Unknown tokens are ignored.
    fn stop(&mut self, token: PlaybackToken);
}

/// Recognizer for hosts without a speech engine; permission is always refused.
#[derive(Debug, Default)]
pub struct UnavailableRecognizer;

impl SpeechRecognizer for UnavailableRecognizer {
    fn request_permission(&mut self) -> BoxFuture<'static, SessionResult<()>> {
        Box::pin(future::ready(Err(SessionError::Permission(
            "no speech recognizer available on this host".to_string(),
        ))))
    }

    fn start(&mut self, _sink: RecognizerSink) -> SessionResult<()> {
        Err(SessionError::Device("no speech recognizer available".to_string()))
    }

    fn reset(&mut self) {}

    fn stop(&mut self) {}
}

/// Output that only logs, holding each clip for roughly its playing time.
///
/// Used by the terminal shell so speaking/stopping behaves like a real speaker.
#[derive(Debug)]
pub struct LoggingAudioOutput {
    bytes_per_second: usize,
    playing: HashMap<PlaybackToken, JoinHandle<()>>,
}

impl LoggingAudioOutput {
    /// `bytes_per_second` is the encoded bitrate used to estimate clip length.
    pub fn new(bytes_per_second: usize) -> Self {
        Self {
            bytes_per_second: bytes_per_second.max(1),
            playing: HashMap::new(),
        }
    }

    fn estimate(&self, len: usize) -> Duration {
        Duration::from_millis((len as u64 * 1000) / self.bytes_per_second as u64)
    }
}

impl Default for LoggingAudioOutput {
    fn default() -> Self {
        // 128 kbit/s MP3
        Self::new(16_000)
    }
}

impl AudioOutput for LoggingAudioOutput {
    fn play(&mut self, token: PlaybackToken, audio: Vec<u8>, done: PlaybackNotifier) -> SessionResult<()> {
        let duration = self.estimate(audio.len());
        info!(
            token = %token,
            bytes = audio.len(),
            duration_ms = duration.as_millis() as u64,
            "Playing synthesized reply"
        );

        self.playing.retain(|_, handle| !handle.is_finished());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            done.finished();
        });
        self.playing.insert(token, handle);
        Ok(())
    }

    fn stop(&mut self, token: PlaybackToken) {
        match self.playing.remove(&token) {
            Some(handle) => {
                handle.abort();
                debug!(token = %token, "Playback interrupted");
            }
            None => warn!(token = %token, "Stop requested for a clip that is not playing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_unavailable_recognizer_refuses_permission() {
        let mut recognizer = UnavailableRecognizer;
        let err = recognizer.request_permission().await.unwrap_err();
        assert!(matches!(err, SessionError::Permission(_)));
    }

    #[test]
    fn test_sink_tags_events_with_capture() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = RecognizerSink::new(tx, 7);
        assert!(sink.result(0, TranscriptChunk::interim("hi")));
        match rx.try_recv().unwrap() {
            ControllerEvent::Recognizer { capture_id, event } => {
                assert_eq!(capture_id, 7);
                assert_eq!(event, RecognizerEvent::Result { index: 0, chunk: TranscriptChunk::interim("hi") });
            }
            _ => panic!("expected a recognizer event"),
        }

        drop(rx);
        assert!(!sink.ended());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logging_output_finishes_after_estimated_length() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut output = LoggingAudioOutput::new(1000);
        let token = PlaybackToken::new(1);
        output.play(token, vec![0u8; 500], PlaybackNotifier::new(tx, token)).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(rx.try_recv(), Ok(ControllerEvent::PlaybackFinished { token: t }) if t == token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_logging_output_stop_suppresses_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut output = LoggingAudioOutput::new(1000);
        let token = PlaybackToken::new(2);
        output.play(token, vec![0u8; 500], PlaybackNotifier::new(tx, token)).unwrap();
        output.stop(token);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
