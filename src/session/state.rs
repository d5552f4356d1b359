//! Session identity, connection status, the busy/activity indicator and the
//! read-only snapshot handed to the UI.

use crate::audio::capture::CaptureState;
use crate::config::ActivityConfig;
use crate::session::events::ControllerEvent;
use crate::session::log::Message;
use crate::timer::DebounceTimer;

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// The one conversation this widget holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Issued by the server in its `connection` acknowledgement
    pub session_id: Option<String>,
    pub agent: String,
    pub personality: String,
    pub connected: bool,
}

impl Session {
    pub fn new(agent: impl Into<String>, personality: impl Into<String>) -> Self {
        Self {
            session_id: None,
            agent: agent.into(),
            personality: personality.into(),
            connected: false,
        }
    }
}

/// Connection as presented to the user. `Reconnecting` is the transient indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Reconnecting { attempt: u32, delay_ms: u64 },
    Closed,
}

impl ConnectionStatus {
    pub fn reconnecting(attempt: u32, delay: Duration) -> Self {
        ConnectionStatus::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
        }
    }
}

/// Busy flag with a label that rotates while the assistant works on a reply.
pub struct ActivityIndicator {
    labels: Vec<String>,
    rotate_every: Duration,
    busy: bool,
    index: usize,
    generation: u64,
    timer: DebounceTimer,
    events: UnboundedSender<ControllerEvent>,
}

impl ActivityIndicator {
    pub(crate) fn new(config: &ActivityConfig, events: UnboundedSender<ControllerEvent>) -> Self {
        Self {
            labels: config.labels.clone(),
            rotate_every: config.rotate_every(),
            busy: false,
            index: 0,
            generation: 0,
            timer: DebounceTimer::new(),
            events,
        }
    }

    /// Turn busy on. Returns `false` if it already was.
    pub fn start(&mut self) -> bool {
        if self.busy {
            return false;
        }
        self.busy = true;
        self.index = 0;
        self.schedule_tick();
        true
    }

    /// Turn busy off. Returns `false` if it already was.
    pub fn stop(&mut self) -> bool {
        if !self.busy {
            return false;
        }
        self.busy = false;
        self.generation += 1;
        self.timer.cancel();
        true
    }

    /// Rotation tick. Returns the new label, or `None` for a stale tick.
    pub fn on_tick(&mut self, generation: u64) -> Option<String> {
        if !self.busy || generation != self.generation || self.labels.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.labels.len();
        self.schedule_tick();
        self.label().map(str::to_string)
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn label(&self) -> Option<&str> {
        if !self.busy {
            return None;
        }
        self.labels.get(self.index).map(String::as_str)
    }

    fn schedule_tick(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.timer
            .arm(self.rotate_every, &self.events, ControllerEvent::ActivityTick { generation });
    }
}

/// A logged message with what the typing animation currently shows of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub displayed: String,
}

/// Everything the UI needs to render the widget at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub connection: ConnectionStatus,
    pub messages: Vec<DisplayedMessage>,
    pub capture: CaptureState,
    pub transcribing: bool,
    /// Live preview of what is being said, not yet sent
    pub interim_transcript: String,
    pub busy: bool,
    pub activity_label: Option<String>,
    pub speaking: bool,
    pub muted: bool,
    pub speech_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn indicator() -> (ActivityIndicator, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = ActivityConfig {
            labels: vec!["Thinking".into(), "Searching".into()],
            rotate_ms: 1000,
        };
        (ActivityIndicator::new(&config, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_labels_rotate_while_busy() {
        let (mut activity, mut rx) = indicator();
        assert_eq!(activity.label(), None);
        assert!(activity.start());
        assert!(!activity.start());
        assert_eq!(activity.label(), Some("Thinking"));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let Some(ControllerEvent::ActivityTick { generation }) = rx.recv().await else {
                panic!("expected tick");
            };
            seen.extend(activity.on_tick(generation));
        }
        assert_eq!(seen, vec!["Searching", "Thinking", "Searching"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_invalidates_pending_tick() {
        let (mut activity, mut rx) = indicator();
        activity.start();
        tokio::time::sleep(Duration::from_millis(1001)).await;
        let Ok(ControllerEvent::ActivityTick { generation }) = rx.try_recv() else {
            panic!("expected tick");
        };

        assert!(activity.stop());
        assert_eq!(activity.on_tick(generation), None);
        assert_eq!(activity.label(), None);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reconnecting_status_serialization() {
        let status = ConnectionStatus::reconnecting(2, Duration::from_secs(3));
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["status"], "reconnecting");
        assert_eq!(json["delay_ms"], 3000);
    }
}
