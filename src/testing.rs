//! In-memory stand-ins for the session's collaborators, shared by unit tests.

use crate::audio::device::{AudioOutput, PlaybackNotifier, RecognizerSink, SpeechRecognizer};
use crate::audio::playback::PlaybackToken;
use crate::connection::{Connector, FrameSink, FrameStream};
use crate::error::{SessionError, SessionResult};
use crate::services::{ChatHistorySource, SpeechSynthesizer};
use crate::session::log::Message;

use async_trait::async_trait;
use futures_util::future::{self, BoxFuture};
use futures_util::sink;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

// ---- transport ----------------------------------------------------------------------

/// Connector whose connections land on a [`LoopbackServer`] in the same process.
pub(crate) struct LoopbackConnector {
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
    accepted: mpsc::UnboundedSender<Peer>,
}

pub(crate) struct LoopbackServer {
    incoming: mpsc::UnboundedReceiver<Peer>,
}

/// Server side of one loopback connection. Dropping it closes the connection.
pub(crate) struct Peer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: Option<mpsc::UnboundedSender<SessionResult<String>>>,
}

impl LoopbackConnector {
    pub(crate) fn new() -> (Self, LoopbackServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            attempts: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicUsize::new(0)),
            accepted: tx,
        };
        (connector, LoopbackServer { incoming: rx })
    }

    /// Connect attempts so far, refused ones included.
    pub(crate) fn attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }

    /// Refuse the next `n` attempts.
    pub(crate) fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, _url: &str) -> SessionResult<(FrameSink, FrameStream)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SessionError::Connection("connection refused".to_string()));
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel::<String>();
        let (server_tx, server_rx) = mpsc::unbounded_channel::<SessionResult<String>>();

        let frame_sink = sink::unfold(client_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| SessionError::Connection("peer went away".to_string()))?;
            Ok::<_, SessionError>(tx)
        });
        let frame_stream = UnboundedReceiverStream::new(server_rx);

        self.accepted
            .send(Peer {
                from_client: client_rx,
                to_client: Some(server_tx),
            })
            .map_err(|_| SessionError::Connection("no server listening".to_string()))?;

        Ok((Box::pin(frame_sink), Box::pin(frame_stream)))
    }
}

impl LoopbackServer {
    pub(crate) async fn accept(&mut self) -> Peer {
        self.incoming.recv().await.expect("connector dropped")
    }
}

impl Peer {
    pub(crate) async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub(crate) async fn recv_json(&mut self) -> serde_json::Value {
        let text = self.recv().await.expect("client closed the connection");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    pub(crate) fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    pub(crate) fn push(&self, frame: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(frame.to_string()));
        }
    }

    /// Drop the connection from the server side.
    pub(crate) fn disconnect(&mut self) {
        self.to_client = None;
    }
}

// ---- recognizer ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecognizerCall {
    Permission,
    Start,
    Reset,
    Stop,
}

/// Gives tests the sink of the running capture so they can play the microphone.
#[derive(Clone, Default)]
pub(crate) struct RecognizerFeed(Arc<Mutex<Option<RecognizerSink>>>);

impl RecognizerFeed {
    pub(crate) fn sink(&self) -> Option<RecognizerSink> {
        self.0.lock().unwrap().clone()
    }
}

pub(crate) struct ScriptedRecognizer {
    grant: bool,
    calls: Arc<Mutex<Vec<RecognizerCall>>>,
    feed: RecognizerFeed,
}

impl ScriptedRecognizer {
    pub(crate) fn granting() -> Self {
        Self {
            grant: true,
            calls: Arc::default(),
            feed: RecognizerFeed::default(),
        }
    }

    pub(crate) fn denying() -> Self {
        Self {
            grant: false,
            ..Self::granting()
        }
    }

    pub(crate) fn calls(&self) -> Arc<Mutex<Vec<RecognizerCall>>> {
        Arc::clone(&self.calls)
    }

    pub(crate) fn feed(&self) -> RecognizerFeed {
        self.feed.clone()
    }

    fn record(&self, call: RecognizerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn request_permission(&mut self) -> BoxFuture<'static, SessionResult<()>> {
        self.record(RecognizerCall::Permission);
        let result = if self.grant {
            Ok(())
        } else {
            Err(SessionError::Permission("microphone access denied".to_string()))
        };
        Box::pin(future::ready(result))
    }

    fn start(&mut self, sink: RecognizerSink) -> SessionResult<()> {
        self.record(RecognizerCall::Start);
        *self.feed.0.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn reset(&mut self) {
        self.record(RecognizerCall::Reset);
    }

    fn stop(&mut self) {
        self.record(RecognizerCall::Stop);
        *self.feed.0.lock().unwrap() = None;
    }
}

// ---- audio output -------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputCall {
    /// Token and clip length in bytes
    Play(PlaybackToken, usize),
    Stop(PlaybackToken),
}

/// Output that records calls and never finishes a clip on its own.
#[derive(Clone, Default)]
pub(crate) struct RecordingOutput {
    calls: Arc<Mutex<Vec<OutputCall>>>,
}

impl RecordingOutput {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<OutputCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl AudioOutput for RecordingOutput {
    fn play(&mut self, token: PlaybackToken, audio: Vec<u8>, _done: PlaybackNotifier) -> SessionResult<()> {
        self.calls.lock().unwrap().push(OutputCall::Play(token, audio.len()));
        Ok(())
    }

    fn stop(&mut self, token: PlaybackToken) {
        self.calls.lock().unwrap().push(OutputCall::Stop(token));
    }
}

// ---- HTTP collaborators -------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct CannedSynthesizer {
    result: SessionResult<Vec<u8>>,
    delay: Option<Duration>,
}

impl CannedSynthesizer {
    pub(crate) fn returning(audio: Vec<u8>) -> Self {
        Self {
            result: Ok(audio),
            delay: None,
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            result: Err(SessionError::Http(message.to_string())),
            delay: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for CannedSynthesizer {
    async fn synthesize(&self, _text: &str) -> SessionResult<Vec<u8>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

pub(crate) struct FakeHistory {
    messages: Vec<Message>,
}

impl FakeHistory {
    pub(crate) fn with(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl ChatHistorySource for FakeHistory {
    async fn fetch(&self, _user_id: Option<&str>) -> SessionResult<Vec<Message>> {
        Ok(self.messages.clone())
    }
}

/// HTTP client that ignores proxy settings from the environment.
pub(crate) fn test_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Answer exactly one HTTP request with a fixed response.
///
/// Returns the base URL and a task resolving to the raw request text.
pub(crate) async fn serve_once(
    status: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];

        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + body_len {
                    break;
                }
            }
        }

        let head = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            content_type,
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        let _ = socket.shutdown().await;

        String::from_utf8_lossy(&request).to_string()
    });

    (format!("http://{}", addr), task)
}
