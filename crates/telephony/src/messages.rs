//! Media-stream control messages
//!
//! Every frame on the provider WebSocket is a JSON object with an `event`
//! discriminator. Parsing is envelope-first: the discriminator is probed
//! before the typed parse so unrecognised events are ignored without being
//! confused with malformed JSON.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::TelephonyError;

/// Discriminator probe.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
}

/// Inbound control frames the bridge consumes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMessage {
    /// Informational; no state change.
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    /// Carries the stream identifier required for outbound media.
    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartMeta,
    },
    /// One chunk of caller audio.
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    /// Terminal; triggers orderly teardown.
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "callSid", default)]
    pub call_sid: Option<String>,
    #[serde(rename = "streamSid", default)]
    pub stream_sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Base64-wrapped μ-law @ 8 kHz, ordinarily 160 bytes but never assumed.
    pub payload: String,
}

impl MediaPayload {
    /// Decode the μ-law payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.payload)
    }
}

/// Parse one inbound control frame.
///
/// `Ok(None)` means a well-formed frame with an event this bridge does not
/// consume; `Err` means malformed JSON. Both are logged and dropped by the
/// caller.
pub fn parse_inbound(text: &str) -> Result<Option<InboundMessage>, TelephonyError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| TelephonyError::Malformed(e.to_string()))?;
    match envelope.event.as_deref() {
        Some("connected") | Some("start") | Some("media") | Some("stop") => {
            serde_json::from_str(text)
                .map(Some)
                .map_err(|e| TelephonyError::Malformed(e.to_string()))
        }
        other => {
            tracing::debug!(event = ?other, "ignoring unrecognised control frame");
            Ok(None)
        }
    }
}

/// Outbound media frame carrying one ≤20 ms μ-law chunk.
#[derive(Debug, Serialize)]
pub struct OutboundMediaMessage {
    event: &'static str,
    #[serde(rename = "streamSid")]
    stream_sid: String,
    media: OutboundPayload,
}

#[derive(Debug, Serialize)]
struct OutboundPayload {
    payload: String,
}

impl OutboundMediaMessage {
    pub fn new(stream_sid: &str, mulaw: &[u8]) -> Self {
        Self {
            event: "media",
            stream_sid: stream_sid.to_string(),
            media: OutboundPayload {
                payload: BASE64.encode(mulaw),
            },
        }
    }

    pub fn to_json(&self) -> String {
        // Plain strings all the way down; serialisation cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Control document steering an inbound call onto the media stream.
pub fn connect_stream_twiml(ws_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Connect>\n    <Stream url=\"{}\"/>\n  </Connect>\n</Response>\n",
        ws_url
    )
}
