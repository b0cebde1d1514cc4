//! Incremental reply segmentation
//!
//! Token deltas stream in faster than speech plays out; carving the reply
//! into sentence-sized fragments lets synthesis start before generation
//! finishes. Fragments are emitted at sentence boundaries, or force-split
//! after 15 words when no boundary arrives.

use regex::Regex;

/// Minimum words per emitted segment.
pub const MIN_SEGMENT_WORDS: usize = 5;
/// Forced split point when no sentence boundary arrives.
pub const MAX_SEGMENT_WORDS: usize = 15;

/// Sentence-terminal punctuation followed by whitespace.
const SENTENCE_BOUNDARY: &str = r"^(.+?[.!?])\s+";

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Rolling segmenter over streaming text deltas.
#[derive(Debug)]
pub struct ResponseSegmenter {
    buffer: String,
    full: String,
    boundary: Regex,
    emitted_any: bool,
}

impl Default for ResponseSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSegmenter {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            full: String::new(),
            boundary: Regex::new(SENTENCE_BOUNDARY).unwrap(),
            emitted_any: false,
        }
    }

    /// Feed one delta; returns any segments that became complete.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        self.full.push_str(delta);

        let mut segments = Vec::new();
        loop {
            if let Some(captures) = self.boundary.captures(&self.buffer) {
                let sentence = captures
                    .get(1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                let consumed = captures.get(0).map(|m| m.end()).unwrap_or(0);
                self.buffer.drain(..consumed);
                self.emit(sentence, &mut segments);
                continue;
            }

            let words: Vec<&str> = self.buffer.split_whitespace().collect();
            if words.len() >= MAX_SEGMENT_WORDS {
                let head = words[..MAX_SEGMENT_WORDS].join(" ");
                self.buffer = words[MAX_SEGMENT_WORDS..].join(" ");
                self.emit(head, &mut segments);
                continue;
            }

            break;
        }
        segments
    }

    /// Flush the tail once the stream completes.
    ///
    /// Falls back to the whole response as a single segment when nothing was
    /// emitted at all but a non-empty reply exists.
    pub fn finish(&mut self) -> Vec<String> {
        let tail = self.buffer.trim().to_string();
        self.buffer.clear();

        let mut segments = Vec::new();
        if !tail.is_empty() {
            self.emit(tail, &mut segments);
        }
        if segments.is_empty() && !self.emitted_any {
            let full = self.full.trim();
            if !full.is_empty() {
                segments.push(full.to_string());
            }
        }
        segments
    }

    fn emit(&mut self, candidate: String, segments: &mut Vec<String>) {
        if word_count(&candidate) >= MIN_SEGMENT_WORDS {
            self.emitted_any = true;
            segments.push(candidate);
        }
    }
}
