//! Cancellable deferred events.
//!
//! A [`DebounceTimer`] posts one event into an unbounded channel after a delay.
//! Re-arming aborts the previous sleep, so only the most recent arm can fire.
//! Receivers still compare a generation number carried inside the event, because
//! an abort can lose the race with a sleep that already completed and queued its event.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct DebounceTimer {
    handle: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Schedule `event` after `delay`, cancelling whatever was scheduled before.
    pub fn arm<E>(&mut self, delay: Duration, tx: &UnboundedSender<E>, event: E)
    where
        E: Send + 'static,
    {
        self.cancel();
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the controller shut down; nothing to do.
            let _ = tx.send(event);
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_rearm_supersedes_previous() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = DebounceTimer::new();

        timer.arm(Duration::from_millis(100), &tx, 1u32);
        tokio::time::sleep(Duration::from_millis(60)).await;
        timer.arm(Duration::from_millis(100), &tx, 2u32);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(rx.try_recv().is_err(), "first arm must have been cancelled");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(rx.try_recv().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = DebounceTimer::new();
        timer.arm(Duration::from_millis(50), &tx, ());
        assert!(timer.is_armed());
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert!(!timer.is_armed());
    }
}
