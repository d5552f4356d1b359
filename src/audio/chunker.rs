//! # Transcript Chunker
//!
//! Turns the recognizer's continuous stream of results into discrete user turns.
//!
//! ## Algorithm:
//! 1. **Fold finals**: Every final result is appended to `accumulated_final` exactly once.
//!    `last_result_index` remembers how far the recognizer's result list has been folded,
//!    so a result that is re-delivered never doubles a word.
//! 2. **Debounce**: Every result (final or interim) bumps `generation`. The owner re-arms
//!    a pause timer and a silence timer with that generation; a timer whose generation is
//!    no longer current is ignored.
//! 3. **Pause → flush**: Accumulated text is emitted as one chunk unless it equals the last
//!    chunk sent. Recording continues, and result numbering starts over.
//! 4. **Silence → stop**: Same flush, then capture ends.
//!
//! Both timers are plain durations. When they are equal, whichever fires first wins and
//! the other one finds nothing left to send.

use std::time::Duration;

/// One recognizer result as produced by the platform adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptChunk {
    pub text: String,
    pub is_final: bool,
}

impl TranscriptChunk {
    pub fn interim(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_final: false }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_final: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub pause: Duration,
    pub silence: Duration,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            pause: Duration::from_millis(2000),
            silence: Duration::from_millis(2000),
        }
    }
}

/// Result of the silence timer: capture must stop, possibly after one last chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilenceStop {
    pub flushed: Option<String>,
}

#[derive(Debug, Default)]
pub struct TranscriptChunker {
    config: ChunkerConfig,
    accumulated_final: String,
    interim: String,
    last_result_index: usize,
    last_sent: Option<String>,
    generation: u64,
}

impl TranscriptChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Current debounce generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reset for a new capture session and return the generation to arm timers with.
    ///
    /// Dedup memory is cleared too: a new capture may legitimately repeat the last sentence.
    pub fn begin(&mut self) -> u64 {
        self.accumulated_final.clear();
        self.interim.clear();
        self.last_result_index = 0;
        self.last_sent = None;
        self.bump()
    }

    /// Fold one recognizer result and return the generation to re-arm both timers with.
    ///
    /// `index` is the result's position in the recognizer's result list since it was
    /// last started or reset.
    pub fn ingest(&mut self, index: usize, chunk: TranscriptChunk) -> u64 {
        let text = chunk.text.trim();

        if index >= self.last_result_index {
            if chunk.is_final {
                if !text.is_empty() {
                    if !self.accumulated_final.is_empty() {
                        self.accumulated_final.push(' ');
                    }
                    self.accumulated_final.push_str(text);
                }
                self.last_result_index = index + 1;
                self.interim.clear();
            } else {
                self.interim = text.to_string();
            }
        }

        self.bump()
    }

    /// Pause timer fired. Returns the chunk to send, if any.
    pub fn pause_elapsed(&mut self, generation: u64) -> Option<String> {
        if generation != self.generation {
            return None;
        }
        self.flush()
    }

    /// Silence timer fired. `None` means the timer was stale and capture goes on.
    pub fn silence_elapsed(&mut self, generation: u64) -> Option<SilenceStop> {
        if generation != self.generation {
            return None;
        }
        Some(SilenceStop { flushed: self.flush() })
    }

    /// Emit accumulated final text, de-duplicated against the last chunk sent.
    pub fn flush(&mut self) -> Option<String> {
        let text = self.accumulated_final.trim().to_string();
        self.accumulated_final.clear();
        self.interim.clear();
        self.last_result_index = 0;

        if text.is_empty() || self.last_sent.as_deref() == Some(text.as_str()) {
            return None;
        }

        self.last_sent = Some(text.clone());
        Some(text)
    }

    /// Drop everything pending and invalidate armed timers.
    pub fn cancel(&mut self) {
        self.accumulated_final.clear();
        self.interim.clear();
        self.last_result_index = 0;
        self.bump();
    }

    /// True while final text is waiting to be flushed (the "transcribing" flag).
    pub fn has_pending(&self) -> bool {
        !self.accumulated_final.trim().is_empty()
    }

    /// True when results have been folded since the recognizer last (re)started numbering.
    pub fn has_folded_results(&self) -> bool {
        self.last_result_index > 0
    }

    /// Live preview: pending finals followed by the current interim guess.
    pub fn preview(&self) -> String {
        match (self.accumulated_final.is_empty(), self.interim.is_empty()) {
            (true, _) => self.interim.clone(),
            (false, true) => self.accumulated_final.clone(),
            (false, false) => format!("{} {}", self.accumulated_final, self.interim),
        }
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}
