//! Telephony media-stream adapter
//!
//! Wire types for the provider's media-stream WebSocket, the outbound frame
//! pacer, and best-effort call recording.

pub mod messages;
pub mod pacer;
pub mod recording;

pub use messages::{
    connect_stream_twiml, parse_inbound, InboundMessage, MediaPayload, OutboundMediaMessage,
    StartMeta,
};
pub use pacer::pace_pcm;
pub use recording::CallRecorder;

use thiserror::Error;

/// Telephony errors
#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("Malformed control message: {0}")]
    Malformed(String),

    #[error("Recording error: {0}")]
    Recording(String),
}
