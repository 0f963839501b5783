//! Sentence-level segmentation of an incoming text stream.
//!
//! Incremental synthesis feeds vendors discrete text spans, not raw deltas.
//! The segmenter buffers fragments until a sentence boundary or a length cap
//! and emits the buffered span as one synthesis unit.

/// Default length cap (in chars) above which a buffer is emitted without
/// waiting for sentence-terminal punctuation.
pub const DEFAULT_MAX_UNIT_LEN: usize = 50;

const SENTENCE_TERMINALS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

/// Accumulates text fragments into synthesis units.
///
/// Emission order equals arrival order, and the concatenation of all emitted
/// units equals the concatenation of all pushed fragments.
#[derive(Debug)]
pub struct SentenceSegmenter {
    buffer: String,
    max_len: usize,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_UNIT_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buffer: String::new(),
            max_len,
        }
    }

    /// Append one fragment, returning a synthesis unit when the buffer ends
    /// in sentence-terminal punctuation (trailing whitespace allowed) or
    /// exceeds the length cap.
    ///
    /// An all-whitespace fragment joins the buffer but never triggers
    /// emission by itself.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);
        if fragment.trim().is_empty() {
            return None;
        }
        if self.ends_sentence() || self.buffer.chars().count() > self.max_len {
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// Emit whatever remains after the input is exhausted.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn ends_sentence(&self) -> bool {
        self.buffer
            .trim_end()
            .chars()
            .next_back()
            .is_some_and(|c| SENTENCE_TERMINALS.contains(&c))
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}
