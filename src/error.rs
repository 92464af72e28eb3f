//! Error taxonomy shared by the socket handlers and the REST pull path.
//!
//! Every variant maps to a stable, client-safe message. Internal detail is
//! kept for logs only and never leaves the process.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Missing, invalid or expired credential.
    #[error("authentication failed")]
    Authentication,

    /// Authenticated, but not a participant / not an administrator.
    #[error("access denied")]
    Authorization,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("persistence call timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Message safe to hand to the initiating client.
    pub fn client_message(&self) -> String {
        match self {
            Self::Authentication => "Authentication failed".to_string(),
            Self::Authorization => "Access denied".to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(what) => format!("{} not found", capitalize(what)),
            Self::Persistence(_) => "Internal server error".to_string(),
            Self::Timeout => "Request timed out".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("json: {}", err))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Persistence(_) | Self::Timeout) {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.client_message() }));
        (self.status_code(), body).into_response()
    }
}
