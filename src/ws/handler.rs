use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use jsonwebtoken::errors::ErrorKind;
use serde::Deserialize;

use crate::auth::jwt;
use crate::auth::middleware::{bearer_token, resolve_user};
use crate::db::models::User;
use crate::error::ChatError;
use crate::proto::ServerEvent;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// The credential may also arrive as `Authorization: Bearer`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token missing, invalid, or naming an unknown user
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates before the actor starts.
/// On auth failure, upgrades, sends an `error` event, then closes with the
/// matching close code. No handler runs for an unauthenticated socket.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_string));

    match authenticate(&state, token.as_deref()).await {
        Ok(user) => {
            tracing::info!(
                user_id = %user.id,
                role = user.role.as_str(),
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user))
        }
        Err(close_code) => {
            tracing::warn!(close_code = close_code, "WebSocket auth failed");
            ws.on_upgrade(move |socket| reject(socket, close_code))
        }
    }
}

/// Resolve the credential to a user, or the close code to reject with.
async fn authenticate(state: &AppState, token: Option<&str>) -> Result<User, u16> {
    let token = token.ok_or(CLOSE_TOKEN_INVALID)?;
    let claims = jwt::validate_access_token(&state.jwt_secret, token).map_err(|err| {
        match err.kind() {
            ErrorKind::ExpiredSignature => CLOSE_TOKEN_EXPIRED,
            _ => CLOSE_TOKEN_INVALID,
        }
    })?;

    resolve_user(state, claims.sub.clone()).await.map_err(|e| {
        if !matches!(e, ChatError::Authentication) {
            tracing::error!(user_id = %claims.sub, error = %e, "User lookup failed during handshake");
        }
        CLOSE_TOKEN_INVALID
    })
}

async fn reject(mut socket: WebSocket, close_code: u16) {
    let reason = if close_code == CLOSE_TOKEN_EXPIRED {
        "Token expired"
    } else {
        "Token invalid"
    };

    if let Ok(text) = serde_json::to_string(&ServerEvent::error("Authentication failed", None)) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: reason.into(),
        })))
        .await;
}
