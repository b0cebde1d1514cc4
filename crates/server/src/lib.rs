//! Voice bridge server
//!
//! HTTP endpoint for the telephony control document plus the media-stream
//! WebSocket and its per-call orchestrator.

pub mod call;
pub mod http;
pub mod state;

pub use call::CallSession;
pub use http::create_router;
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Backend construction failed at startup.
    #[error("Internal error: {0}")]
    Internal(String),
}
