//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// HTTP/WebSocket server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Upstream speech-to-text configuration
    #[serde(default)]
    pub stt: SttSettings,

    /// Chat model configuration
    #[serde(default)]
    pub llm: LlmSettings,

    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsSettings,

    /// Telephony provider credentials
    #[serde(default)]
    pub telephony: TelephonySettings,

    /// Call recording configuration
    #[serde(default)]
    pub recording: RecordingSettings,
}

impl Settings {
    /// Load settings: env vars > optional config file > defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder
            .add_source(Environment::default().separator("__"))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ConfigError::Load(e.to_string()))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public hostname the telephony provider dials back to (no scheme)
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000)
}

fn default_base_url() -> String {
    std::env::var("BASE_URL").unwrap_or_else(|_| "localhost:3000".to_string())
}

/// Upstream STT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSettings {
    /// Streaming endpoint (WebSocket)
    #[serde(default = "default_stt_endpoint")]
    pub endpoint: String,

    /// Provider API key
    #[serde(default = "default_sarvam_api_key")]
    pub api_key: String,

    /// Transcription model identifier
    #[serde(default = "default_stt_model")]
    pub model: String,

    /// Language hint for transcription
    #[serde(default = "default_stt_language")]
    pub language: String,

    /// Server-side VAD sensitivity
    #[serde(default = "default_vad_sensitivity")]
    pub vad_sensitivity: String,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            endpoint: default_stt_endpoint(),
            api_key: default_sarvam_api_key(),
            model: default_stt_model(),
            language: default_stt_language(),
            vad_sensitivity: default_vad_sensitivity(),
        }
    }
}

fn default_stt_endpoint() -> String {
    "wss://api.sarvam.ai/speech-to-text/ws".to_string()
}

fn default_sarvam_api_key() -> String {
    std::env::var("SARVAM_API_KEY").unwrap_or_default()
}

fn default_stt_model() -> String {
    "saarika:v2".to_string()
}

fn default_stt_language() -> String {
    "unknown".to_string()
}

fn default_vad_sensitivity() -> String {
    "high".to_string()
}

/// Chat model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Bedrock region hosting the model
    #[serde(default = "default_aws_region")]
    pub region: String,

    /// Bedrock model identifier
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Bearer token for the Bedrock runtime endpoint
    #[serde(default = "default_bedrock_token")]
    pub api_key: String,

    /// Generation cap in tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Log the full outgoing prompt at debug level
    #[serde(default = "default_debug_prompt")]
    pub debug_prompt: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            region: default_aws_region(),
            model_id: default_model_id(),
            api_key: default_bedrock_token(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            debug_prompt: default_debug_prompt(),
        }
    }
}

fn default_aws_region() -> String {
    std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}

fn default_model_id() -> String {
    std::env::var("BEDROCK_MODEL_ID")
        .unwrap_or_else(|_| "anthropic.claude-3-haiku-20240307-v1:0".to_string())
}

fn default_bedrock_token() -> String {
    std::env::var("AWS_BEARER_TOKEN_BEDROCK").unwrap_or_default()
}

fn default_max_tokens() -> usize {
    180
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.7
}

fn default_debug_prompt() -> bool {
    std::env::var("DEBUG_LLM_PROMPT")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Text-to-speech configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    /// Synthesis endpoint (HTTP)
    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,

    /// Provider API key
    #[serde(default = "default_sarvam_api_key")]
    pub api_key: String,

    /// Voice identifier
    #[serde(default = "default_tts_voice")]
    pub voice: String,

    /// Synthesis model identifier
    #[serde(default = "default_tts_model")]
    pub model: String,

    /// Default language for synthesis
    #[serde(default = "default_tts_language")]
    pub language: String,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            endpoint: default_tts_endpoint(),
            api_key: default_sarvam_api_key(),
            voice: default_tts_voice(),
            model: default_tts_model(),
            language: default_tts_language(),
        }
    }
}

fn default_tts_endpoint() -> String {
    "https://api.sarvam.ai/text-to-speech".to_string()
}

fn default_tts_voice() -> String {
    "meera".to_string()
}

fn default_tts_model() -> String {
    "bulbul:v1".to_string()
}

fn default_tts_language() -> String {
    "en-IN".to_string()
}

/// Telephony provider credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonySettings {
    #[serde(default = "default_twilio_account_sid")]
    pub account_sid: String,

    #[serde(default = "default_twilio_auth_token")]
    pub auth_token: String,
}

impl Default for TelephonySettings {
    fn default() -> Self {
        Self {
            account_sid: default_twilio_account_sid(),
            auth_token: default_twilio_auth_token(),
        }
    }
}

fn default_twilio_account_sid() -> String {
    std::env::var("TWILIO_ACCOUNT_SID").unwrap_or_default()
}

fn default_twilio_auth_token() -> String {
    std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default()
}

/// Call recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Enable raw capture and WAV conversion
    #[serde(default = "default_recording_enabled")]
    pub enabled: bool,

    /// Directory for recordings
    #[serde(default = "default_recording_dir")]
    pub dir: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: default_recording_enabled(),
            dir: default_recording_dir(),
        }
    }
}

fn default_recording_enabled() -> bool {
    true
}

fn default_recording_dir() -> String {
    "recordings".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.llm.max_tokens, 180);
        assert!((settings.llm.temperature - 0.2).abs() < f32::EPSILON);
        assert!((settings.llm.top_p - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.tts.language, "en-IN");
        assert_eq!(settings.stt.vad_sensitivity, "high");
        assert!(settings.recording.enabled);
    }

    #[test]
    fn test_model_id_default() {
        let settings = Settings::default();
        // Unless overridden via BEDROCK_MODEL_ID the Haiku model is used.
        if std::env::var("BEDROCK_MODEL_ID").is_err() {
            assert_eq!(
                settings.llm.model_id,
                "anthropic.claude-3-haiku-20240307-v1:0"
            );
        }
    }
}
