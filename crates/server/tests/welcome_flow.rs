//! End-to-end media-stream behaviour over a live WebSocket.
//!
//! Boots the real router on an ephemeral port with mock speech backends and
//! drives it the way the telephony provider would.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use agri_voice_config::Settings;
use agri_voice_core::TextToSpeech;
use agri_voice_llm::{FinishReason, GenerationResult, LlmBackend, LlmError, Message as LlmMessage};
use agri_voice_server::{create_router, AppState};

/// Fixed 100 ms of silence per segment: five 20 ms frames on the wire.
struct ToneSynth;

#[async_trait]
impl TextToSpeech for ToneSynth {
    async fn synthesize(&self, _text: &str, _language: &str) -> agri_voice_core::Result<Vec<u8>> {
        Ok(vec![0u8; 1600])
    }
}

/// Never reached in this test; the transcription stream stays dark.
struct UnusedBackend;

#[async_trait]
impl LlmBackend for UnusedBackend {
    async fn generate_stream(
        &self,
        _messages: &[LlmMessage],
        _tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult {
            text: String::new(),
            tokens: 0,
            time_to_first_token_ms: 0,
            total_time_ms: 0,
            finish_reason: FinishReason::Stop,
        })
    }

    fn model_name(&self) -> &str {
        "unused"
    }
}

async fn start_server() -> std::net::SocketAddr {
    let mut settings = Settings::default();
    settings.recording.enabled = false;
    let state = AppState::with_backends(settings, Arc::new(UnusedBackend), Arc::new(ToneSynth));
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_welcome_played_after_start() {
    let addr = start_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/voice/stream", addr))
        .await
        .unwrap();

    ws.send(Message::Text(
        r#"{"event":"connected","protocol":"Call","version":"1.0"}"#.to_string(),
    ))
    .await
    .unwrap();
    ws.send(Message::Text(
        r#"{"event":"start","streamSid":"MZtest","start":{"callSid":"CAtest","streamSid":"MZtest"}}"#
            .to_string(),
    ))
    .await
    .unwrap();

    // The welcome synthesises to 100 ms of PCM: five paced media frames.
    let mut frames = 0;
    while frames < 5 {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for welcome media")
            .expect("socket closed early")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["event"], "media");
            assert_eq!(value["streamSid"], "MZtest");
            assert!(value["media"]["payload"].as_str().is_some());
            frames += 1;
        }
    }

    ws.send(Message::Text(
        r#"{"event":"stop","streamSid":"MZtest"}"#.to_string(),
    ))
    .await
    .unwrap();
    let _ = ws.close(None).await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_server().await;
    let body = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json::<serde_json::Value>()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_incoming_call_returns_control_document() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/voice/incoming", addr))
        .form(&[("CallSid", "CAtest"), ("From", "+911234567890")])
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.contains("text/xml"));

    let body = response.text().await.unwrap();
    assert!(body.contains("<Connect>"));
    assert!(body.contains("/voice/stream"));
}
