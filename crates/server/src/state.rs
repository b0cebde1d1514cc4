//! Application state

use std::sync::Arc;
use std::time::Duration;

use agri_voice_config::Settings;
use agri_voice_core::TextToSpeech;
use agri_voice_llm::{BedrockBackend, BedrockConfig, LlmBackend};
use agri_voice_pipeline::{SarvamSynth, SarvamSynthConfig, TtsQueue};

use crate::ServerError;

/// Shared application state.
///
/// The TTS queue is the only process-wide mutable piece: the provider rate
/// limit it guards is itself global. Everything else is per-call.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub llm: Arc<dyn LlmBackend>,
    pub tts: TtsQueue,
}

impl AppState {
    /// Build state with the production backends.
    pub fn new(settings: Settings) -> Result<Self, ServerError> {
        let llm = BedrockBackend::new(BedrockConfig {
            region: settings.llm.region.clone(),
            model_id: settings.llm.model_id.clone(),
            api_key: settings.llm.api_key.clone(),
            max_tokens: settings.llm.max_tokens,
            temperature: settings.llm.temperature,
            top_p: settings.llm.top_p,
            timeout: Duration::from_secs(60),
        })
        .map_err(|e| ServerError::Internal(e.to_string()))?;

        let synth = SarvamSynth::new(SarvamSynthConfig {
            endpoint: settings.tts.endpoint.clone(),
            api_key: settings.tts.api_key.clone(),
            voice: settings.tts.voice.clone(),
            model: settings.tts.model.clone(),
            timeout: Duration::from_secs(30),
        })
        .map_err(|e| ServerError::Internal(e.to_string()))?;

        Ok(Self::with_backends(settings, Arc::new(llm), Arc::new(synth)))
    }

    /// Build state around explicit backends; tests substitute mocks here.
    pub fn with_backends(
        settings: Settings,
        llm: Arc<dyn LlmBackend>,
        synth: Arc<dyn TextToSpeech>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            llm,
            tts: TtsQueue::spawn(synth),
        }
    }
}
