//! Conversation listings, find-or-create and per-user counters for the pull path.

use crate::chat::store;
use crate::chat::messages::{self, SentMessage};
use crate::chat::{profiles, require_admin};
use crate::db::models::{Conversation, User};
use crate::db::{self, users};
use crate::error::ChatError;
use crate::proto::events::SendMessageRequest;
use crate::proto::views::{
    ConversationList, ConversationSummary, CreatedConversation, LastMessage, NotificationList,
    NotificationView, UnreadCount,
};
use crate::state::AppState;

/// Build a summary. `viewer` scopes the unread count; `None` reports 0.
fn summarize(
    conn: &rusqlite::Connection,
    conversation: Conversation,
    viewer: Option<&str>,
) -> Result<ConversationSummary, ChatError> {
    let people = profiles(conn, &conversation.participants())?;
    let participants = conversation
        .participants()
        .iter()
        .filter_map(|id| people.get(*id).cloned())
        .collect();
    let last = store::last_message(conn, &conversation)?;
    let unread = match viewer {
        Some(user_id) => store::unread_in_conversation(conn, &conversation.id, user_id)?,
        None => 0,
    };
    Ok(ConversationSummary::new(
        conversation,
        participants,
        last.as_ref().map(LastMessage::from),
        unread,
    ))
}

/// The caller's conversations, most recently active first.
pub async fn list_for_user(
    state: &AppState,
    user: &User,
    page: Option<u32>,
    limit: Option<u32>,
) -> Result<ConversationList, ChatError> {
    let (page, limit) = state.chat.page_window(page, limit);
    let user_id = user.id.clone();
    let conversations = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        let conn: &rusqlite::Connection = conn;
        store::list_conversations_for(conn, &user_id, page, limit)?
            .into_iter()
            .map(|c| summarize(conn, c, Some(user_id.as_str())))
            .collect::<Result<Vec<_>, _>>()
    })
    .await?;

    Ok(ConversationList {
        has_more: conversations.len() == limit as usize,
        conversations,
        page,
        limit,
    })
}

/// Every conversation in the system. Administrators only.
pub async fn list_all(
    state: &AppState,
    user: &User,
    page: Option<u32>,
    limit: Option<u32>,
) -> Result<ConversationList, ChatError> {
    require_admin(user)?;
    let (page, limit) = state.chat.page_window(page, limit);
    let conversations = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        let conn: &rusqlite::Connection = conn;
        store::list_all_conversations(conn, page, limit)?
            .into_iter()
            .map(|c| summarize(conn, c, None))
            .collect::<Result<Vec<_>, _>>()
    })
    .await?;

    Ok(ConversationList {
        has_more: conversations.len() == limit as usize,
        conversations,
        page,
        limit,
    })
}

/// Find or create the conversation with `participant_id`. An optional first
/// message goes through the regular send path, including its live fan-out.
pub async fn start_conversation(
    state: &AppState,
    user: &User,
    participant_id: &str,
    first_message: Option<String>,
) -> Result<CreatedConversation, ChatError> {
    let participant_id = participant_id.trim().to_string();
    if participant_id.is_empty() {
        return Err(ChatError::validation("participantId is required"));
    }
    if participant_id == user.id {
        return Err(ChatError::validation("Cannot start a conversation with yourself"));
    }

    let caller_id = user.id.clone();
    let other = participant_id.clone();
    let (conversation, created) = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        if users::find_user(conn, &other)?.is_none() {
            return Err(ChatError::NotFound("participant"));
        }
        store::find_or_create_conversation(conn, &caller_id, &other)
    })
    .await?;

    if created {
        tracing::info!(
            conversation_id = %conversation.id,
            user_id = %user.id,
            participant_id = %participant_id,
            "Conversation created"
        );
    }

    let message = match first_message.filter(|m| !m.trim().is_empty()) {
        Some(content) => {
            let SentMessage { message, .. } = messages::send_message(
                state,
                user,
                SendMessageRequest {
                    conversation_id: Some(conversation.id.clone()),
                    receiver_id: Some(participant_id),
                    content: Some(content),
                    ..Default::default()
                },
            )
            .await?;
            Some(message)
        }
        None => None,
    };

    let viewer = user.id.clone();
    let id = conversation.id.clone();
    let summary = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        let conversation = store::find_conversation(conn, &id)?
            .ok_or(ChatError::NotFound("conversation"))?;
        summarize(conn, conversation, Some(viewer.as_str()))
    })
    .await?;

    Ok(CreatedConversation {
        conversation: summary,
        message,
        created,
    })
}

pub async fn unread_count(state: &AppState, user: &User) -> Result<UnreadCount, ChatError> {
    let user_id = user.id.clone();
    let count = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        Ok(store::unread_count_for(conn, &user_id)?)
    })
    .await?;
    Ok(UnreadCount { count })
}

/// The caller's notifications, newest first.
pub async fn list_notifications(
    state: &AppState,
    user: &User,
    page: Option<u32>,
    limit: Option<u32>,
) -> Result<NotificationList, ChatError> {
    let (page, limit) = state.chat.page_window(page, limit);
    let user_id = user.id.clone();
    let notifications = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        Ok(store::list_notifications(conn, &user_id, page, limit)?)
    })
    .await?;

    Ok(NotificationList {
        has_more: notifications.len() == limit as usize,
        notifications: notifications.into_iter().map(NotificationView::from).collect(),
        page,
        limit,
    })
}
