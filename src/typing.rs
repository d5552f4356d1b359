//! # Typing Animator
//!
//! Reveals an assistant message word by word at a human-like cadence.
//!
//! ## How it works:
//! 1. The message is split into words; the byte offset where each word ends is kept
//! 2. A random per-word delay in `[min_word_delay, max_word_delay]` is drawn for every
//!    word up front, plus `sentence_pause` after a word ending in `.`, `!` or `?`
//! 3. A background task sleeps through the schedule and posts one `TypingProgress` event
//!    per word into the controller loop
//! 4. The displayed text is always `&content[..word_end]`, a view over the stored message
//!
//! ## Cancellation:
//! Starting a new animation cancels the running one. A cancelled animation stops
//! advancing and keeps whatever it had revealed. It never rolls back.
//!
//! The animator is not synchronised with playback: speech may finish before or after
//! the reveal does.

use crate::config::TypingConfig;
use crate::session::events::ControllerEvent;

use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Cancellation handle for one running animation.
#[derive(Debug, Clone)]
pub struct AnimationHandle {
    id: u64,
    message_id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl AnimationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One accepted progress step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reveal {
    pub message_id: Uuid,
    /// Byte length of the visible prefix
    pub visible: usize,
    pub complete: bool,
}

struct Running {
    handle: AnimationHandle,
    word_ends: Vec<usize>,
    revealed: usize,
    task: JoinHandle<()>,
}

pub struct TypingAnimator {
    config: TypingConfig,
    events: UnboundedSender<ControllerEvent>,
    running: Option<Running>,
    /// Visible prefix length of animations that were cut short
    frozen: HashMap<Uuid, usize>,
    next_id: u64,
}

impl TypingAnimator {
    pub(crate) fn new(config: TypingConfig, events: UnboundedSender<ControllerEvent>) -> Self {
        Self {
            config,
            events,
            running: None,
            frozen: HashMap::new(),
            next_id: 0,
        }
    }

    /// Start revealing `full_text` for `message_id`, cancelling any running animation.
    ///
    /// Returns `None` when the text has no words (nothing to animate).
    pub fn animate(&mut self, message_id: Uuid, full_text: &str) -> Option<AnimationHandle> {
        self.cancel_running();

        let word_ends = word_ends(full_text);
        if word_ends.is_empty() {
            return None;
        }

        self.next_id += 1;
        let handle = AnimationHandle {
            id: self.next_id,
            message_id,
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        let schedule = self.schedule(full_text, &word_ends);
        let total: Duration = schedule.iter().sum();
        debug!(
            animation = handle.id,
            words = word_ends.len(),
            total_ms = total.as_millis() as u64,
            "Starting typing animation"
        );

        let task = {
            let events = self.events.clone();
            let cancelled = Arc::clone(&handle.cancelled);
            let animation = handle.id;
            tokio::spawn(async move {
                for (i, delay) in schedule.into_iter().enumerate() {
                    tokio::time::sleep(delay).await;
                    if cancelled.load(Ordering::SeqCst) {
                        return;
                    }
                    let progress = ControllerEvent::TypingProgress { animation, revealed: i + 1 };
                    if events.send(progress).is_err() {
                        return;
                    }
                }
            })
        };

        self.running = Some(Running {
            handle: handle.clone(),
            word_ends,
            revealed: 0,
            task,
        });
        Some(handle)
    }

    /// Apply one progress event. Stale or cancelled animations yield `None`.
    pub fn on_progress(&mut self, animation: u64, revealed: usize) -> Option<Reveal> {
        let running = self.running.as_mut()?;
        if running.handle.id != animation || running.handle.is_cancelled() {
            return None;
        }

        running.revealed = revealed.min(running.word_ends.len());
        let visible = running.word_ends[running.revealed.saturating_sub(1)];
        let complete = running.revealed == running.word_ends.len();
        let message_id = running.handle.message_id;

        if complete {
            self.running = None;
        }

        Some(Reveal {
            message_id,
            visible,
            complete,
        })
    }

    /// Stop the running animation, keeping what it revealed.
    pub fn cancel_running(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.cancel();
            running.task.abort();
            let visible = match running.revealed {
                0 => 0,
                n => running.word_ends[n - 1],
            };
            debug!(animation = running.handle.id, visible, "Typing animation cancelled");
            self.frozen.insert(running.handle.message_id, visible);
        }
    }

    pub fn is_animating(&self, message_id: Uuid) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.handle.message_id == message_id)
    }

    /// What the UI should show for `message_id` whose full content is `full`.
    pub fn displayed<'a>(&self, message_id: Uuid, full: &'a str) -> &'a str {
        let visible = match &self.running {
            Some(r) if r.handle.message_id == message_id => match r.revealed {
                0 => 0,
                n => r.word_ends[n - 1],
            },
            _ => match self.frozen.get(&message_id) {
                Some(&visible) => visible,
                None => return full,
            },
        };
        full.get(..visible).unwrap_or(full)
    }

    /// Drop bookkeeping for a message that left the log.
    pub fn forget(&mut self, message_id: Uuid) {
        self.frozen.remove(&message_id);
    }

    fn schedule(&self, text: &str, word_ends: &[usize]) -> Vec<Duration> {
        let min = self.config.min_word_delay_ms;
        let max = self.config.max_word_delay_ms.max(min);
        let mut rng = rand::thread_rng();

        let mut delays = Vec::with_capacity(word_ends.len());
        let mut after_sentence = false;
        for &end in word_ends {
            let mut delay = Duration::from_millis(rng.gen_range(min..=max));
            if after_sentence {
                delay += self.config.sentence_pause();
            }
            delays.push(delay);
            after_sentence = ends_sentence(&text[..end]);
        }
        delays
    }
}

impl Drop for TypingAnimator {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.cancel();
            running.task.abort();
        }
    }
}

/// Byte offsets where each whitespace-separated word ends.
fn word_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if in_word {
                ends.push(i);
            }
            in_word = false;
        } else {
            in_word = true;
        }
    }
    if in_word {
        ends.push(text.len());
    }
    ends
}

fn ends_sentence(prefix: &str) -> bool {
    prefix
        .trim_end_matches(['"', '\'', ')'])
        .ends_with(['.', '!', '?'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn config() -> TypingConfig {
        TypingConfig {
            min_word_delay_ms: 50,
            max_word_delay_ms: 150,
            sentence_pause_ms: 300,
        }
    }

    #[test]
    fn test_word_ends() {
        assert_eq!(word_ends("  hi there  you"), vec![4, 10, 15]);
        assert_eq!(word_ends("héllo wörld"), vec![6, 13]);
        assert!(word_ends("   ").is_empty());
    }

    /// A 10-word reply with two sentence breaks is fully revealed within
    /// 10 × max delay plus the two sentence pauses.
    #[tokio::test(start_paused = true)]
    async fn test_ten_words_revealed_within_bound() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut animator = TypingAnimator::new(config(), tx);
        let text = "Sure. The kitchen lights are all on now! Anything else?";
        assert_eq!(word_ends(text).len(), 10);
        let id = Uuid::new_v4();

        let started = Instant::now();
        let handle = animator.animate(id, text).unwrap();
        assert_eq!(animator.displayed(id, text), "");

        let mut steps = Vec::new();
        while let Some(ControllerEvent::TypingProgress { animation, revealed }) = rx.recv().await {
            assert_eq!(animation, handle.id());
            let reveal = animator.on_progress(animation, revealed).unwrap();
            steps.push(reveal.visible);
            if reveal.complete {
                break;
            }
        }

        let elapsed = Instant::now() - started;
        assert!(elapsed <= Duration::from_millis(10 * 150 + 2 * 300), "took {:?}", elapsed);
        assert!(elapsed >= Duration::from_millis(10 * 50 + 2 * 300), "took {:?}", elapsed);
        assert_eq!(steps.len(), 10);
        assert!(steps.windows(2).all(|w| w[0] < w[1]));
        assert!(!animator.is_animating(id));
        assert_eq!(animator.displayed(id, text), text);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_animation_freezes_previous_prefix() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut animator = TypingAnimator::new(config(), tx);
        let first_text = "one two three four five";
        let first = Uuid::new_v4();
        let handle = animator.animate(first, first_text).unwrap();

        for _ in 0..2 {
            let Some(ControllerEvent::TypingProgress { animation, revealed }) = rx.recv().await else {
                panic!("expected progress");
            };
            animator.on_progress(animation, revealed);
        }
        assert_eq!(animator.displayed(first, first_text), "one two");

        let second = Uuid::new_v4();
        animator.animate(second, "six seven").unwrap();
        assert!(handle.is_cancelled());

        // Stale progress for the first message is ignored.
        assert_eq!(animator.on_progress(handle.id(), 3), None);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(animator.displayed(first, first_text), "one two");

        animator.forget(first);
        assert_eq!(animator.displayed(first, first_text), first_text);
    }

    #[tokio::test]
    async fn test_blank_text_is_not_animated() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut animator = TypingAnimator::new(config(), tx);
        assert!(animator.animate(Uuid::new_v4(), "  \n").is_none());
    }

    #[test]
    fn test_sentence_endings() {
        assert!(ends_sentence("Done."));
        assert!(ends_sentence("Really?\""));
        assert!(!ends_sentence("e.g"));
    }
}
