//! Per-call streaming pipeline components
//!
//! The pieces the session orchestrator wires together:
//! - the upstream STT session manager with its reconnect policy
//! - the utterance assembler and filler filter
//! - the incremental reply segmenter
//! - the one-turn LLM driver
//! - the process-wide sequential TTS queue

pub mod driver;
pub mod segmenter;
pub mod stt;
pub mod tts;
pub mod utterance;

pub use driver::run_turn;
pub use segmenter::{ResponseSegmenter, MAX_SEGMENT_WORDS, MIN_SEGMENT_WORDS};
pub use stt::{SttConfig, SttEvent, SttSession};
pub use tts::{SarvamSynth, SarvamSynthConfig, TtsQueue};
pub use utterance::{accept_utterance, is_filler, UtteranceAssembler, SILENCE_TIMEOUT};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}
