//! Utterance assembly
//!
//! Streaming STT providers emit progressively longer partials for the same
//! stretch of speech. The assembler collects them and, on flush, keeps the
//! longest one as the most complete rendering of the utterance.

use std::time::{Duration, Instant};

/// Silence gap that ends an utterance.
pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(1200);

/// Minimum utterance length (chars, after trimming) worth routing.
pub const MIN_UTTERANCE_CHARS: usize = 8;

/// Acknowledgement words that carry no routable content.
const FILLERS: &[&str] = &[
    "okay", "ok", "hm", "hmm", "haan", "han", "yes", "no", "right", "aha", "uh", "um", "oh",
    "sure", "alright", "good", "fine", "thanks", "thank you",
];

/// Collects partial transcripts between flushes.
///
/// Holds zero utterances (between speakers) or one in-progress utterance.
#[derive(Debug, Default)]
pub struct UtteranceAssembler {
    partials: Vec<String>,
    last_update: Option<Instant>,
}

impl UtteranceAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new partial transcript.
    pub fn push(&mut self, transcript: &str) {
        self.partials.push(transcript.to_string());
        self.last_update = Some(Instant::now());
    }

    /// Drop any in-progress utterance (the speaker started over).
    pub fn clear(&mut self) {
        self.partials.clear();
        self.last_update = None;
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    /// The transcript a flush would select, without consuming it.
    pub fn current_longest(&self) -> Option<&str> {
        self.partials
            .iter()
            .max_by_key(|p| p.len())
            .map(String::as_str)
    }

    /// Take the longest accumulated partial and reset.
    ///
    /// A second flush for the same utterance (silence timer racing the
    /// provider's speech-end event) sees an empty list and is a no-op.
    pub fn flush(&mut self) -> Option<String> {
        let longest = self.current_longest().map(String::from);
        self.clear();
        longest
    }
}

/// Reject filler acknowledgements: lowercased, trailing punctuation stripped,
/// then matched against the filler set.
pub fn is_filler(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    let stripped = lowered
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .trim();
    FILLERS.contains(&stripped)
}

/// The utterance filter: `Some(text)` when the utterance should reach the
/// model, `None` for empty, too-short, or filler input.
pub fn accept_utterance(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_UTTERANCE_CHARS {
        return None;
    }
    if is_filler(trimmed) {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_timeout_value() {
        assert_eq!(SILENCE_TIMEOUT.as_millis(), 1200);
    }

    #[test]
    fn test_flush_selects_longest_partial() {
        let mut assembler = UtteranceAssembler::new();
        assembler.push("how");
        assembler.push("how is");
        assembler.push("how is the weather");

        assert_eq!(assembler.flush().as_deref(), Some("how is the weather"));
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_double_flush_is_noop() {
        let mut assembler = UtteranceAssembler::new();
        assembler.push("hello there friend");

        assert!(assembler.flush().is_some());
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_clear_drops_partials() {
        let mut assembler = UtteranceAssembler::new();
        assembler.push("stale partial");
        assembler.clear();
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_filler_set_rejected_any_case_and_punctuation() {
        for filler in ["okay", "OKAY", "Okay.", "hmm...", "Thank you!", "haan", "sure,"] {
            assert!(is_filler(filler), "{:?} should be filler", filler);
            assert!(accept_utterance(filler).is_none(), "{:?} should be rejected", filler);
        }
    }

    #[test]
    fn test_short_utterances_rejected() {
        assert!(accept_utterance("").is_none());
        assert!(accept_utterance("   ").is_none());
        assert!(accept_utterance("weather").is_none()); // 7 chars
    }

    #[test]
    fn test_real_utterances_accepted() {
        let text = "which crop should I sow in July in Punjab?";
        assert_eq!(accept_utterance(text).as_deref(), Some(text));
        // Exactly at the length threshold and not a filler.
        assert!(accept_utterance("weathers").is_some());
    }
}
