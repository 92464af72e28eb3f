//! REST endpoints for conversations.
//!
//! Conversations are one-to-one. Participant order is normalized in storage,
//! so creating one twice from either side returns the same record.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::AuthUser;
use crate::chat::{conversations, messages};
use crate::dm::extract::AppJson;
use crate::error::ChatError;
use crate::proto::views::{ConversationList, ConversationPage, CreatedConversation, ReadAck};
use crate::state::AppState;

/// `?page=&limit=` on listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participant_id: String,
    /// Optional first message, sent through the regular send path.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadBody {
    #[serde(default)]
    pub message_ids: Option<Vec<String>>,
}

/// GET /api/conversations: the caller's conversations, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ConversationList>, ChatError> {
    let list = conversations::list_for_user(&state, &user, query.page, query.limit).await?;
    Ok(Json(list))
}

/// POST /api/conversations: find or create. 201 when created, 200 when it already existed.
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    AppJson(body): AppJson<CreateConversationRequest>,
) -> Result<(StatusCode, Json<CreatedConversation>), ChatError> {
    let created =
        conversations::start_conversation(&state, &user, &body.participant_id, body.message)
            .await?;
    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(created)))
}

/// GET /api/conversations/{id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ConversationPage>, ChatError> {
    let page =
        messages::load_conversation(&state, &user, &conversation_id, query.page, query.limit)
            .await?;
    Ok(Json(page))
}

/// PUT /api/conversations/{id}/read
/// Body is optional; without `messageIds` every unread message is marked.
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(conversation_id): Path<String>,
    body: Bytes,
) -> Result<Json<ReadAck>, ChatError> {
    let body: MarkReadBody = if body.is_empty() {
        MarkReadBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ChatError::validation(e.to_string()))?
    };
    let message_ids = body.message_ids;
    let ack = messages::mark_read(&state, &user, &conversation_id, message_ids).await?;
    Ok(Json(ack))
}

/// GET /api/admin/conversations: every conversation. 403 for non-admins.
pub async fn admin_list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ConversationList>, ChatError> {
    let list = conversations::list_all(&state, &user, query.page, query.limit).await?;
    Ok(Json(list))
}
