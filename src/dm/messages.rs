//! REST endpoints for messages, unread counts and notifications.
//! Mutations emit the same live events as their socket counterparts.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::AuthUser;
use crate::chat::{conversations, messages};
use crate::dm::extract::AppJson;
use crate::dm::conversations::PageQuery;
use crate::error::ChatError;
use crate::proto::events::SendMessageRequest;
use crate::proto::views::{DeletedNotice, MessageView, NotificationList, UnreadCount};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    #[serde(default)]
    pub for_everyone: bool,
}

/// POST /api/messages
/// Body: `{conversationId?, receiverId, content, type?, metadata?}`, the same shape as `message:send`.
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppJson(body): AppJson<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ChatError> {
    let sent = messages::send_message(&state, &user, body).await?;
    Ok((StatusCode::CREATED, Json(sent.message)))
}

/// DELETE /api/messages/{id}?forEveryone=bool
pub async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<DeletedNotice>, ChatError> {
    let notice = messages::delete_message(&state, &user, &message_id, query.for_everyone).await?;
    Ok(Json(notice))
}

/// GET /api/messages/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<UnreadCount>, ChatError> {
    Ok(Json(conversations::unread_count(&state, &user).await?))
}

/// GET /api/notifications: newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<NotificationList>, ChatError> {
    let list = conversations::list_notifications(&state, &user, query.page, query.limit).await?;
    Ok(Json(list))
}
