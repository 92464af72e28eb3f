use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use serde::{Deserialize, Serialize};

use crate::db::models::{Role, User};
use crate::db::{self, users};
use crate::error::ChatError;
use crate::state::AppState;

/// JWT claims extracted from Authorization: Bearer header.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Account role at issuance time (re-checked against the users table)
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Pull the token out of an `Authorization: Bearer <jwt>` header value.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ChatError::Authentication)?;

        // Get JWT secret from request extensions (set by middleware layer)
        let jwt_secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or_else(|| ChatError::Persistence("JWT secret missing from extensions".into()))?;

        crate::auth::jwt::validate_access_token(&jwt_secret.0, token)
            .map_err(|_| ChatError::Authentication)
    }
}

/// JWT secret stored in request extensions for the Claims extractor
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);

/// Authenticated caller resolved against the users table.
/// Role comes from the stored record, not from the token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claims = Claims::from_request_parts(parts, state).await?;
        let user = resolve_user(state, claims.sub).await?;
        Ok(AuthUser(user))
    }
}

/// Look up the user a credential names. A token for an unknown user fails closed.
pub async fn resolve_user(state: &AppState, user_id: String) -> Result<User, ChatError> {
    db::run(&state.db, state.chat.db_timeout(), move |conn| {
        users::find_user(conn, &user_id)?.ok_or(ChatError::Authentication)
    })
    .await
}
