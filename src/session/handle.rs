//! Cloneable handle for driving a running [`SessionController`](super::SessionController)
//! from another task (the UI shell).
//!
//! Every call becomes a command on the controller's event channel and waits for the
//! controller's answer, so commands are applied in the same order as everything else.
//! Once the controller has stopped, every call returns `SessionError::Closed`.

use crate::error::{SessionError, SessionResult};
use crate::session::events::{Command, ControllerEvent, Reply};
use crate::session::state::SessionSnapshot;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: UnboundedSender<ControllerEvent>,
}

impl SessionHandle {
    pub(crate) fn new(tx: UnboundedSender<ControllerEvent>) -> Self {
        Self { tx }
    }

    pub async fn send_text(&self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        self.request(|reply| Command::SendText { text, reply }).await
    }

    pub async fn start_capture(&self) -> SessionResult<()> {
        self.request(|reply| Command::StartCapture { reply }).await
    }

    pub async fn stop_capture(&self) -> SessionResult<()> {
        self.request(|reply| Command::StopCapture { reply }).await
    }

    pub async fn set_muted(&self, muted: bool) -> SessionResult<()> {
        self.request(|reply| Command::SetMuted { muted, reply }).await
    }

    pub async fn set_speech_enabled(&self, enabled: bool) -> SessionResult<()> {
        self.request(|reply| Command::SetSpeechEnabled { enabled, reply }).await
    }

    pub async fn update_session(&self, agent: impl Into<String>, personality: impl Into<String>) -> SessionResult<()> {
        let agent = agent.into();
        let personality = personality.into();
        self.request(|reply| Command::UpdateSession { agent, personality, reply })
            .await
    }

    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Snapshot { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Close the session. Resolves once the controller has released everything.
    pub async fn close(&self) -> SessionResult<()> {
        self.request(|reply| Command::Close { reply }).await
    }

    async fn request<T, F>(&self, build: F) -> SessionResult<T>
    where
        F: FnOnce(Reply<T>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.post(build(reply))?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    fn post(&self, command: Command) -> SessionResult<()> {
        self.tx
            .send(ControllerEvent::Command(command))
            .map_err(|_| SessionError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_commands_reach_the_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(tx);

        let responder = tokio::spawn(async move {
            match rx.recv().await {
                Some(ControllerEvent::Command(Command::SendText { text, reply })) => {
                    assert_eq!(text, "hello");
                    let _ = reply.send(Err(SessionError::NotConnected));
                }
                other => panic!("unexpected event {:?}", other),
            }
        });

        assert_eq!(handle.send_text("hello").await, Err(SessionError::NotConnected));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_controller_reports_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(tx);
        drop(rx);
        assert_eq!(handle.set_muted(true).await, Err(SessionError::Closed));
        assert!(matches!(handle.snapshot().await, Err(SessionError::Closed)));
    }
}
