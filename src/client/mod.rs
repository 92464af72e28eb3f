//! Client Reconciliation Bridge.
//!
//! Push events from the socket are treated as invalidation hints; the REST
//! pull path is ground truth. A cached query is only ever filled from a
//! pull response, never from a push payload.

pub mod api;
pub mod bridge;
pub mod cache;
pub mod socket;
pub mod typing;

use thiserror::Error;

pub use api::{PullApi, RestClient};
pub use bridge::ReconciliationBridge;
pub use cache::{QueryCache, QueryData, QueryKey};
pub use socket::SocketClient;
pub use typing::{TypingTracker, TYPING_EXPIRY};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response; `message` is the server's `error` field.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}
