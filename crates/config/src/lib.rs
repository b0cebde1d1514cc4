//! Configuration for the agri voice bridge
//!
//! Settings load env-first through the `config` crate with optional file
//! overrides; every recognised environment variable has a serde default so
//! the bridge boots with no configuration at all.

pub mod settings;

pub use settings::{
    LlmSettings, RecordingSettings, ServerSettings, Settings, SttSettings, TelephonySettings,
    TtsSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
