//! Sequential text-to-speech queue
//!
//! One worker for the whole process: the provider rate-limits bursts, so
//! synthesis requests from every active call funnel through a single mailbox
//! and run strictly one at a time. Jobs never fail outward; a permanent
//! provider failure yields `None` and the segment is skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use agri_voice_core::{Error as CoreError, TextToSpeech};

use crate::PipelineError;

/// Synthesis attempts per segment.
pub const MAX_RETRIES: u32 = 2;
/// Linear backoff between attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);
/// Segments below this word count are not worth a provider call.
pub const MIN_TTS_WORDS: usize = 5;

struct TtsJob {
    text: String,
    language: String,
    reply: oneshot::Sender<Option<Vec<u8>>>,
}

/// Cloneable handle onto the process-wide synthesis worker.
#[derive(Clone)]
pub struct TtsQueue {
    job_tx: mpsc::Sender<TtsJob>,
}

impl TtsQueue {
    /// Spawn the worker around a provider implementation.
    pub fn spawn(synth: Arc<dyn TextToSpeech>) -> Self {
        let (job_tx, mut job_rx) = mpsc::channel::<TtsJob>(32);
        tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                let audio = synthesize_with_retry(synth.as_ref(), &job.text, &job.language).await;
                let _ = job.reply.send(audio);
            }
        });
        Self { job_tx }
    }

    /// Synthesize one segment to PCM16LE @ 8 kHz.
    ///
    /// Returns `None` for too-short segments and on permanent provider
    /// failure; callers skip the segment either way.
    pub async fn synthesize(&self, text: &str, language: &str) -> Option<Vec<u8>> {
        if text.split_whitespace().count() < MIN_TTS_WORDS {
            tracing::debug!(text = %text, "segment below minimum word count, skipping");
            return None;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = TtsJob {
            text: text.to_string(),
            language: language.to_string(),
            reply: reply_tx,
        };
        if self.job_tx.send(job).await.is_err() {
            return None;
        }
        reply_rx.await.unwrap_or(None)
    }
}

async fn synthesize_with_retry(
    synth: &dyn TextToSpeech,
    text: &str,
    language: &str,
) -> Option<Vec<u8>> {
    for attempt in 1..=MAX_RETRIES {
        if attempt > 1 {
            tokio::time::sleep(RETRY_DELAY).await;
        }
        match synth.synthesize(text, language).await {
            Ok(audio) => return Some(audio),
            Err(e) => {
                tracing::warn!(error = %e, attempt, "tts synthesis failed");
            }
        }
    }
    None
}

// =============================================================================
// Provider client
// =============================================================================

/// Synthesis provider configuration.
#[derive(Debug, Clone)]
pub struct SarvamSynthConfig {
    pub endpoint: String,
    pub api_key: String,
    pub voice: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for SarvamSynthConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.sarvam.ai/text-to-speech".to_string(),
            api_key: String::new(),
            voice: "meera".to_string(),
            model: "bulbul:v1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP synthesis client. Requests linear16 at 8 kHz and decodes the first
/// audio blob of the response.
pub struct SarvamSynth {
    config: SarvamSynthConfig,
    client: Client,
}

impl SarvamSynth {
    pub fn new(config: SarvamSynthConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Tts(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn build_request(&self, text: &str, language: &str) -> SynthRequest {
        SynthRequest {
            inputs: vec![text.to_string()],
            target_language_code: language.to_string(),
            speaker: self.config.voice.clone(),
            model: self.config.model.clone(),
            audio_codec: "linear16".to_string(),
            speech_sample_rate: 8000,
        }
    }
}

#[async_trait]
impl TextToSpeech for SarvamSynth {
    async fn synthesize(&self, text: &str, language: &str) -> agri_voice_core::Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("api-subscription-key", &self.config.api_key)
            .json(&self.build_request(text, language))
            .send()
            .await
            .map_err(|e| CoreError::Speech(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Speech(format!("HTTP {}: {}", status, body)));
        }

        let parsed: SynthResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Speech(e.to_string()))?;

        let first = parsed
            .audios
            .first()
            .ok_or_else(|| CoreError::Speech("no audio in response".to_string()))?;
        BASE64
            .decode(first)
            .map_err(|e| CoreError::Speech(format!("invalid audio payload: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct SynthRequest {
    inputs: Vec<String>,
    target_language_code: String,
    speaker: String,
    model: String,
    audio_codec: String,
    speech_sample_rate: u32,
}

#[derive(Debug, Deserialize)]
struct SynthResponse {
    #[serde(default)]
    audios: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock provider that tracks how many syntheses run at once.
    struct CountingSynth {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountingSynth {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextToSpeech for CountingSynth {
        async fn synthesize(&self, _text: &str, _language: &str) -> agri_voice_core::Result<Vec<u8>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![0u8; 320])
        }
    }

    /// Mock provider that always fails.
    struct FailingSynth {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextToSpeech for FailingSynth {
        async fn synthesize(&self, _text: &str, _language: &str) -> agri_voice_core::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Speech("provider down".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_strictly_sequential_across_callers() {
        let synth = Arc::new(CountingSynth::new());
        let queue = TtsQueue::spawn(synth.clone());

        // Concurrent sessions all hammer the queue at once.
        let mut handles = Vec::new();
        for i in 0..6 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .synthesize(&format!("segment number {} with enough words", i), "en-IN")
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }

        assert_eq!(synth.calls.load(Ordering::SeqCst), 6);
        assert_eq!(synth.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_yields_none() {
        let synth = Arc::new(FailingSynth {
            calls: AtomicUsize::new(0),
        });
        let queue = TtsQueue::spawn(synth.clone());

        let audio = queue
            .synthesize("these five words are enough", "en-IN")
            .await;
        assert!(audio.is_none());
        assert_eq!(synth.calls.load(Ordering::SeqCst), MAX_RETRIES as usize);
    }

    #[tokio::test]
    async fn test_short_segment_rejected_without_provider_call() {
        let synth = Arc::new(CountingSynth::new());
        let queue = TtsQueue::spawn(synth.clone());

        assert!(queue.synthesize("too short", "en-IN").await.is_none());
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_synth_request_shape() {
        let synth = SarvamSynth::new(SarvamSynthConfig::default()).unwrap();
        let request = synth.build_request("Paddy suits July well.", "hi-IN");
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains("\"audio_codec\":\"linear16\""));
        assert!(json.contains("\"speech_sample_rate\":8000"));
        assert!(json.contains("hi-IN"));
    }

    #[test]
    fn test_synth_response_parse() {
        let json = r#"{"request_id":"r1","audios":["AAAA"]}"#;
        let parsed: SynthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.audios.len(), 1);
    }
}
