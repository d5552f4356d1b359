//! # Playback Manager
//!
//! Speaks assistant replies through the single audio output.
//!
//! ## Guarantees:
//! - **One voice**: at most one clip is active (synthesizing or playing). A new clip
//!   stops the current one before it starts; clips are never queued behind each other.
//! - **Deterministic release**: an interrupted clip is stopped on the output and its
//!   in-flight synthesis request is aborted, so rapid supersedes leak nothing.
//! - **Stale results are dropped**: synthesis results and completion notices carry the
//!   token they belong to; anything for a token that is no longer active is ignored.
//!
//! ## Flow:
//! ```text
//! speak(text) ──► [Synthesizing] ──Synthesized──► [Playing] ──PlaybackFinished──► idle
//!                      │                              │
//!                      └──────── stop_current() ──────┘
//! ```

use crate::audio::device::{AudioOutput, PlaybackNotifier};
use crate::error::{SessionError, SessionResult};
use crate::services::synthesis::SpeechSynthesizer;
use crate::session::events::ControllerEvent;

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to one synthesized clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackToken(u64);

impl PlaybackToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip-{}", self.0)
    }
}

enum Active {
    Synthesizing { token: PlaybackToken, task: JoinHandle<()> },
    Playing { token: PlaybackToken },
}

impl Active {
    fn token(&self) -> PlaybackToken {
        match self {
            Active::Synthesizing { token, .. } | Active::Playing { token } => *token,
        }
    }
}

pub struct PlaybackManager {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Box<dyn AudioOutput>,
    events: UnboundedSender<ControllerEvent>,
    active: Option<Active>,
    next_token: u64,
    muted: bool,
    max_speech_chars: usize,
}

impl PlaybackManager {
    pub(crate) fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Box<dyn AudioOutput>,
        events: UnboundedSender<ControllerEvent>,
        max_speech_chars: usize,
    ) -> Self {
        Self {
            synthesizer,
            output,
            events,
            active: None,
            next_token: 0,
            muted: false,
            max_speech_chars,
        }
    }

    /// Synthesize `text` and play it once the audio arrives.
    ///
    /// Returns `None` when muted or when nothing speakable is left after preparation.
    /// Whatever was active before is stopped first.
    pub fn speak(&mut self, text: &str) -> Option<PlaybackToken> {
        if self.muted {
            debug!("Muted, not speaking reply");
            return None;
        }

        let prepared = prepare_for_speech(text, self.max_speech_chars);
        if prepared.is_empty() {
            return None;
        }

        self.stop_current();
        let token = self.issue_token();
        let synthesizer = Arc::clone(&self.synthesizer);
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let result = synthesizer.synthesize(&prepared).await;
            let _ = events.send(ControllerEvent::Synthesized { token, result });
        });

        debug!(token = %token, "Requested speech synthesis");
        self.active = Some(Active::Synthesizing { token, task });
        Some(token)
    }

    /// Synthesis finished for `token`.
    ///
    /// ## Returns:
    /// - **Ok(true)**: audio is now playing
    /// - **Ok(false)**: the clip was superseded meanwhile; the audio is dropped
    /// - **Err(Synthesis)**: request failed or came back empty; nothing plays
    pub fn on_synthesized(&mut self, token: PlaybackToken, result: SessionResult<Vec<u8>>) -> SessionResult<bool> {
        match &self.active {
            Some(Active::Synthesizing { token: current, .. }) if *current == token => {}
            _ => {
                debug!(token = %token, "Dropping synthesis result for a superseded clip");
                return Ok(false);
            }
        }
        self.active = None;

        let audio = result.map_err(|err| match err {
            SessionError::Synthesis(_) => err,
            other => SessionError::Synthesis(other.to_string()),
        })?;

        self.play(token, audio)?;
        Ok(true)
    }

    /// Play already-synthesized audio, superseding whatever is active.
    pub fn enqueue(&mut self, audio: Vec<u8>) -> SessionResult<PlaybackToken> {
        self.stop_current();
        let token = self.issue_token();
        self.play(token, audio)?;
        Ok(token)
    }

    /// Interrupt the active clip, if any, and release its resources.
    pub fn stop_current(&mut self) -> Option<PlaybackToken> {
        let active = self.active.take()?;
        let token = active.token();

        match active {
            Active::Synthesizing { task, .. } => {
                task.abort();
                debug!(token = %token, "Cancelled pending synthesis");
            }
            Active::Playing { token } => {
                self.output.stop(token);
                info!(token = %token, "Stopped playback");
            }
        }
        Some(token)
    }

    /// Natural completion reported by the output. Returns whether it was the active clip.
    pub fn on_finished(&mut self, token: PlaybackToken) -> bool {
        match self.active {
            Some(Active::Playing { token: current }) if current == token => {
                self.active = None;
                debug!(token = %token, "Playback finished");
                true
            }
            _ => false,
        }
    }

    /// Muting stops the current clip before anything else.
    pub fn set_muted(&mut self, muted: bool) {
        if muted {
            self.stop_current();
        }
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// True while a clip is audible.
    pub fn is_speaking(&self) -> bool {
        matches!(self.active, Some(Active::Playing { .. }))
    }

    pub fn active_token(&self) -> Option<PlaybackToken> {
        self.active.as_ref().map(Active::token)
    }

    fn issue_token(&mut self) -> PlaybackToken {
        self.next_token += 1;
        PlaybackToken(self.next_token)
    }

    fn play(&mut self, token: PlaybackToken, audio: Vec<u8>) -> SessionResult<()> {
        if audio.is_empty() {
            return Err(SessionError::Synthesis("synthesis returned no audio".to_string()));
        }

        let notifier = PlaybackNotifier::new(self.events.clone(), token);
        if let Err(err) = self.output.play(token, audio, notifier) {
            warn!(token = %token, error = %err, "Audio output refused clip");
            return Err(err);
        }

        self.active = Some(Active::Playing { token });
        Ok(())
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.stop_current();
    }
}

/// Turn chat markdown into something a speech engine reads naturally.
///
/// Drops heading and quote markers at the start of a line, emphasis and code markers
/// around words, and link URLs (the label stays). Characters that are part of the text,
/// like `snake_case`, `#1` or `3 > 2`, are kept. Whitespace is collapsed and the result
/// is cut at a word boundary past `max_chars`.
pub fn prepare_for_speech(text: &str, max_chars: usize) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for line in text.lines() {
        strip_inline_markup(strip_block_markers(line), &mut cleaned);
        cleaned.push(' ');
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let mut out = String::new();
    for word in collapsed.split(' ') {
        let next_len = out.chars().count() + word.chars().count() + usize::from(!out.is_empty());
        if next_len > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Quote markers (possibly nested), an ATX heading marker, or a horizontal rule.
fn strip_block_markers(line: &str) -> &str {
    let mut rest = line.trim_start();
    while let Some(inner) = rest.strip_prefix('>') {
        rest = inner.trim_start();
    }

    let hashes = rest.len() - rest.trim_start_matches('#').len();
    if (1..=6).contains(&hashes) {
        let after = &rest[hashes..];
        if after.is_empty() || after.starts_with(char::is_whitespace) {
            rest = after.trim_start();
        }
    }

    let rule = rest.trim_end();
    if rule.len() >= 3 && rule.chars().all(|c| matches!(c, '*' | '-' | '_' | ' ')) {
        return "";
    }
    rest
}

fn strip_inline_markup(line: &str, out: &mut String) {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '`' => i += 1,
            '*' | '_' | '~' => {
                let start = i;
                while i < chars.len() && chars[i] == c {
                    i += 1;
                }
                let before = start.checked_sub(1).map(|j| chars[j]);
                let after = chars.get(i).copied();
                // A single tilde is "approximately", only ~~ is strikethrough.
                let strike_ok = c != '~' || i - start >= 2;
                if !(strike_ok && is_emphasis_run(before, after)) {
                    out.extend(&chars[start..i]);
                }
            }
            '[' => i += 1,
            ']' => {
                i += 1;
                // [label](url) -> label
                if chars.get(i) == Some(&'(') {
                    if let Some(close) = chars[i..].iter().position(|&ch| ch == ')') {
                        i += close + 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
}

/// A marker run opens or closes emphasis when it touches a word on one side only.
/// Runs inside a word (`snake_case`) or between spaces (`3 * 4`) are literal.
fn is_emphasis_run(before: Option<char>, after: Option<char>) -> bool {
    let is_word = |c: Option<char>| c.is_some_and(char::is_alphanumeric);
    let is_space = |c: Option<char>| c.map_or(true, char::is_whitespace);

    if is_word(before) && is_word(after) {
        return false;
    }
    !is_space(after) || !is_space(before)
}
