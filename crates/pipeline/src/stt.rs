//! Upstream STT session management
//!
//! One long-lived task per call owns the provider WebSocket. Inbound PCM is
//! staged in a [`PcmBuffer`]; once at least 200 ms has accumulated and the
//! socket is open, the buffer is wrapped in a WAV header, base64-encoded and
//! sent as a `transcribe` frame. Frames arriving before the socket opens are
//! held and flushed right after.
//!
//! Provider events are forwarded to the orchestrator over an `mpsc` queue,
//! including a `Closed { code }` marker for every upstream close so the
//! orchestrator can treat a clean close as an implicit end of speech.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

use agri_voice_core::{wrap_wav, PcmBuffer};

use crate::PipelineError;

/// Audio buffered before a transcribe frame is worth sending.
pub const FLUSH_THRESHOLD_MS: u64 = 200;

/// Upstream connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Events surfaced to the orchestrator.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// Non-empty partial transcript.
    Transcript(String),
    /// Provider detected start of speech.
    SpeechStart,
    /// Provider detected end of speech.
    SpeechEnd,
    /// Upstream error; the session stays dark afterwards.
    Error(String),
    /// Upstream closed with the given close code.
    Closed { code: u16 },
}

/// Upstream session configuration.
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub vad_sensitivity: String,
    pub sample_rate: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://api.sarvam.ai/speech-to-text/ws".to_string(),
            api_key: String::new(),
            model: "saarika:v2".to_string(),
            language: "unknown".to_string(),
            vad_sensitivity: "high".to_string(),
            sample_rate: 8000,
        }
    }
}

/// Reconnect only after a clean provider close, on a live call, with no
/// sticky error observed on this upstream. Anything else leaves the session
/// dark for the remainder of the call.
pub fn should_reconnect(close_code: u16, stopped: bool, had_error: bool) -> bool {
    close_code == 1000 && !stopped && !had_error
}

/// Build the provider WebSocket URL with its query parameters.
fn build_ws_url(config: &SttConfig) -> String {
    format!(
        "{}?model={}&language-code={}&sample-rate={}&vad-sensitivity={}&mode=transcription",
        config.endpoint, config.model, config.language, config.sample_rate, config.vad_sensitivity
    )
}

/// Handle to a spawned upstream session.
///
/// Dropping the handle closes the audio lane; the task flushes whatever PCM
/// remains, closes the upstream socket and exits.
pub struct SttSession {
    audio_tx: mpsc::Sender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl SttSession {
    /// Spawn the session task. Provider events arrive on the returned queue.
    pub fn spawn(config: SttConfig, stopped: watch::Receiver<bool>) -> (Self, mpsc::Receiver<SttEvent>) {
        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let task = tokio::spawn(run_session(config, audio_rx, event_tx, stopped));
        (Self { audio_tx, task }, event_rx)
    }

    /// Stage PCM16LE @ 8 kHz for transcription.
    pub async fn push_audio(&self, pcm: Vec<u8>) {
        if self.audio_tx.send(pcm).await.is_err() {
            tracing::debug!("stt session already closed, dropping audio");
        }
    }

    /// Close the audio lane and let the task drain and exit.
    pub fn close(self) {
        drop(self.audio_tx);
        drop(self.task);
    }
}

enum ConnectionEnd {
    /// Our side closed (call over); no reconnect, no event.
    Local,
    /// Upstream closed with a code; surfaced to the orchestrator.
    Remote(u16),
}

async fn run_session(
    config: SttConfig,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    event_tx: mpsc::Sender<SttEvent>,
    mut stopped: watch::Receiver<bool>,
) {
    let mut buffer = PcmBuffer::new();
    let mut had_error = false;

    loop {
        let end = match run_connection(
            &config,
            &mut audio_rx,
            &event_tx,
            &mut buffer,
            &mut had_error,
            &mut stopped,
        )
        .await
        {
            Ok(end) => end,
            Err(e) => {
                tracing::warn!(error = %e, "transcription stream failed");
                ConnectionEnd::Remote(1006)
            }
        };

        match end {
            ConnectionEnd::Local => break,
            ConnectionEnd::Remote(code) => {
                let _ = event_tx.send(SttEvent::Closed { code }).await;
                if !should_reconnect(code, *stopped.borrow(), had_error) {
                    if code != 1000 {
                        tracing::warn!(code, "transcription stream dark for rest of call");
                    }
                    break;
                }
                tracing::info!("reopening transcription stream after clean close");
            }
        }
    }
}

async fn run_connection(
    config: &SttConfig,
    audio_rx: &mut mpsc::Receiver<Vec<u8>>,
    event_tx: &mpsc::Sender<SttEvent>,
    buffer: &mut PcmBuffer,
    had_error: &mut bool,
    stopped: &mut watch::Receiver<bool>,
) -> Result<ConnectionEnd, PipelineError> {
    let mut request = build_ws_url(config)
        .into_client_request()
        .map_err(|e| PipelineError::WebSocket(e.to_string()))?;
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| PipelineError::WebSocket(e.to_string()))?,
    );

    let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| PipelineError::WebSocket("upstream connect timeout".to_string()))?
        .map_err(|e| PipelineError::WebSocket(e.to_string()))?;
    tracing::debug!("transcription stream open");
    let (mut sink, mut stream) = ws.split();

    // Audio held while connecting goes out immediately.
    if !buffer.is_empty() {
        send_transcribe(&mut sink, buffer.take()).await?;
    }

    loop {
        tokio::select! {
            staged = audio_rx.recv() => match staged {
                Some(pcm) => {
                    buffer.push(&pcm);
                    if buffer.duration_ms() >= FLUSH_THRESHOLD_MS {
                        send_transcribe(&mut sink, buffer.take()).await?;
                    }
                }
                None => {
                    if !buffer.is_empty() {
                        let _ = send_transcribe(&mut sink, buffer.take()).await;
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Local);
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_upstream_text(&text, event_tx, had_error).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                    return Ok(ConnectionEnd::Remote(code));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "transcription stream read error");
                    return Ok(ConnectionEnd::Remote(1006));
                }
                None => return Ok(ConnectionEnd::Remote(1006)),
            },
            changed = stopped.changed() => {
                // A dropped sender means the session is gone; treat it as a
                // stop so the arm cannot spin.
                if changed.is_err() || *stopped.borrow() {
                    if !buffer.is_empty() {
                        let _ = send_transcribe(&mut sink, buffer.take()).await;
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Local);
                }
            }
        }
    }
}

async fn send_transcribe<S>(sink: &mut S, pcm: Vec<u8>) -> Result<(), PipelineError>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let frame = TranscribeFrame::new(&pcm);
    let json = serde_json::to_string(&frame)
        .map_err(|e| PipelineError::Stt(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| PipelineError::WebSocket(e.to_string()))
}

async fn handle_upstream_text(text: &str, event_tx: &mpsc::Sender<SttEvent>, had_error: &mut bool) {
    let message: UpstreamMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed transcription message");
            return;
        }
    };

    match message.event.as_deref() {
        Some("transcript") => {
            let transcript = message
                .transcript
                .or(message.data.and_then(|d| d.transcript))
                .unwrap_or_default();
            if !transcript.trim().is_empty() {
                let _ = event_tx.send(SttEvent::Transcript(transcript)).await;
            }
        }
        Some("speech_start") => {
            let _ = event_tx.send(SttEvent::SpeechStart).await;
        }
        Some("speech_end") => {
            let _ = event_tx.send(SttEvent::SpeechEnd).await;
        }
        Some("error") => {
            *had_error = true;
            let detail = message.message.unwrap_or_else(|| "unspecified".to_string());
            tracing::warn!(detail = %detail, "transcription stream error");
            let _ = event_tx.send(SttEvent::Error(detail)).await;
        }
        other => {
            tracing::trace!(event = ?other, "unhandled transcription event");
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// Outbound audio frame: 200 ms of PCM wrapped in a WAV header.
#[derive(Debug, Serialize)]
struct TranscribeFrame {
    event: &'static str,
    audio: TranscribeAudio,
}

#[derive(Debug, Serialize)]
struct TranscribeAudio {
    data: String,
}

impl TranscribeFrame {
    fn new(pcm: &[u8]) -> Self {
        let wav = wrap_wav(pcm, 8000, 1, 16);
        Self {
            event: "transcribe",
            audio: TranscribeAudio {
                data: BASE64.encode(wav),
            },
        }
    }
}

/// Inbound provider message. The transcript may sit at the top level or be
/// nested under `data` depending on provider version.
#[derive(Debug, Deserialize)]
struct UpstreamMessage {
    #[serde(default, alias = "type")]
    event: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    data: Option<UpstreamData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamData {
    #[serde(default)]
    transcript: Option<String>,
}
