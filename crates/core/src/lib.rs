//! Core types for the agri voice bridge
//!
//! Foundational pieces shared by every other crate:
//! - the audio codec layer (G.711 μ-law, WAV wrapping, upsampling)
//! - PCM staging buffers and telephony frame arithmetic
//! - conversation history types
//! - backend trait seams (TTS)

pub mod audio;
pub mod codec;
pub mod conversation;
pub mod error;
pub mod traits;

pub use audio::{PcmBuffer, FRAME_MS, MULAW_FRAME_BYTES, PCM_BYTES_PER_MS, PCM_FRAME_BYTES};
pub use codec::{mulaw_decode, mulaw_encode, upsample_8k_to_16k, wrap_wav};
pub use conversation::{ConversationHistory, Turn, TurnRole};
pub use error::{Error, Result};
pub use traits::TextToSpeech;
