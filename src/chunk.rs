//! Sentence-boundary text chunker.
//!
//! Splits document text into bounded segments on sentence-terminal
//! punctuation, carrying a small overlap from the tail of each closed chunk
//! into the next one.
//!
//! # Algorithm
//!
//! 1. Split the text on runs of `。！？.!?`, discarding blank fragments.
//! 2. Accumulate sentences (each re-terminated with `。`) into a buffer.
//! 3. When appending the next sentence would exceed `chunk_size` characters,
//!    emit the trimmed buffer and seed the next one with the overlap carried
//!    by the [`OverlapPolicy`], followed by the triggering sentence.
//! 4. Emit whatever remains after the last sentence.
//!
//! Sizes are approximate. A single sentence longer than `chunk_size` is never
//! split further and becomes an oversized chunk of its own.
//!
//! # Example
//!
//! ```rust
//! use kb_relay::chunk::split_text;
//!
//! let chunks = split_text("First sentence. Second sentence.", 1000, 200);
//! assert_eq!(chunks.len(), 1);
//! assert!(chunks[0].starts_with("First sentence"));
//! ```

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Characters that end a sentence.
const TERMINATORS: [char; 6] = ['。', '！', '？', '.', '!', '?'];

/// Terminator appended to every accumulated sentence.
const SENTENCE_END: char = '。';

/// Approximate characters per whitespace token used to turn the overlap hint
/// into a token count.
const CHARS_PER_OVERLAP_TOKEN: usize = 6;

/// Decides which tail of a closed chunk is carried into the next chunk.
pub trait OverlapPolicy: Send + Sync {
    fn carry(&self, closed: &str, overlap_hint: usize) -> String;
}

/// Keeps the last `overlap_hint / 6` whitespace-delimited tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenOverlap;

impl OverlapPolicy for WhitespaceTokenOverlap {
    fn carry(&self, closed: &str, overlap_hint: usize) -> String {
        let keep = overlap_hint / CHARS_PER_OVERLAP_TOKEN;
        if keep == 0 {
            return String::new();
        }
        let tokens: Vec<&str> = closed.split_whitespace().collect();
        let start = tokens.len().saturating_sub(keep);
        tokens[start..].join(" ")
    }
}

/// Configured sentence chunker.
pub struct Chunker {
    chunk_size: usize,
    overlap_hint: usize,
    overlap: Box<dyn OverlapPolicy>,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap_hint: usize) -> Self {
        Self::with_policy(chunk_size, overlap_hint, Box::new(WhitespaceTokenOverlap))
    }

    pub fn with_policy(
        chunk_size: usize,
        overlap_hint: usize,
        overlap: Box<dyn OverlapPolicy>,
    ) -> Self {
        Self {
            chunk_size,
            overlap_hint,
            overlap,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.overlap_hint)
    }

    /// Split `text` into ordered chunk strings. Empty input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut buf = String::new();
        let mut buf_chars = 0usize;

        for sentence in sentences(text) {
            let sentence_chars = sentence.chars().count();

            if buf_chars + sentence_chars > self.chunk_size {
                let closed = buf.trim();
                if !closed.is_empty() {
                    chunks.push(closed.to_string());
                }

                let carried = self.overlap.carry(&buf, self.overlap_hint);
                buf.clear();
                if !carried.is_empty() {
                    buf.push_str(&carried);
                    buf.push(' ');
                }
                buf.push_str(sentence.trim_start());
            } else {
                buf.push_str(sentence);
            }
            buf.push(SENTENCE_END);
            buf_chars = buf.chars().count();
        }

        let rest = buf.trim();
        if !rest.is_empty() {
            chunks.push(rest.to_string());
        }

        chunks
    }

    /// Split `text` and wrap the pieces as [`Chunk`]s of `document`.
    pub fn chunk_document(&self, document: &str, text: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(sequence_index, text)| Chunk {
                source_document: document.to_string(),
                sequence_index,
                char_length: text.chars().count(),
                text,
            })
            .collect()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

/// Split with the default overlap policy.
pub fn split_text(text: &str, chunk_size: usize, overlap_hint: usize) -> Vec<String> {
    Chunker::new(chunk_size, overlap_hint).split(text)
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(TERMINATORS.as_slice())
        .filter(|s| !s.trim().is_empty())
}
