//! Backend trait seams

use async_trait::async_trait;

use crate::error::Result;

/// Text-to-speech provider contract.
///
/// Implementations return PCM16LE at 8 kHz mono, ready for μ-law framing.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;
}
