//! Chat Handler: send, mark read, load history, delete.

use serde_json::json;

use crate::chat::store::{self, NewMessage};
use crate::chat::{authorized_conversation, broadcast, profiles};
use crate::db::models::{now_timestamp, Conversation, Message, Notification, User};
use crate::db::{self, users};
use crate::error::ChatError;
use crate::proto::events::SendMessageRequest;
use crate::proto::views::{
    ConversationPage, DeleteMode, DeletedNotice, MessageView, NotificationView, ReadAck,
    ReadReceipt, UserProfile,
};
use crate::state::AppState;

/// Characters of message content quoted in a notification body.
const NOTIFICATION_PREVIEW_CHARS: usize = 100;

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: MessageView,
    pub conversation: Conversation,
    pub conversation_created: bool,
}

/// Persist a message and deliver it.
///
/// Conversation resolution, the message insert and the conversation update
/// commit together. Live delivery happens only after that commit; the
/// notification and activity entry follow as a best-effort second step.
pub async fn send_message(
    state: &AppState,
    sender: &User,
    req: SendMessageRequest,
) -> Result<SentMessage, ChatError> {
    let receiver_id = req
        .receiver_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ChatError::validation("receiverId is required"))?
        .to_string();

    let content = req.content.as_deref().map(str::trim).unwrap_or_default();
    if content.is_empty() {
        return Err(ChatError::validation("Message content is required"));
    }
    let max = state.chat.max_content_length;
    if content.chars().count() > max {
        return Err(ChatError::validation(format!(
            "Message content exceeds {} characters",
            max
        )));
    }
    if receiver_id == sender.id {
        return Err(ChatError::validation("Cannot send a message to yourself"));
    }

    let content = content.to_string();
    let conversation_id = req.conversation_id.filter(|id| !id.trim().is_empty());
    let sender_id = sender.id.clone();
    let message_type = req.message_type;
    let metadata = req.metadata;

    let recorded = db::run_until(&state.db, state.chat.db_timeout(), move |conn, deadline| {
        if users::find_user(conn, &receiver_id)?.is_none() {
            return Err(ChatError::NotFound("receiver"));
        }
        store::record_message(
            conn,
            &NewMessage {
                conversation_id: conversation_id.as_deref(),
                sender_id: &sender_id,
                receiver_id: &receiver_id,
                content: &content,
                message_type,
                metadata: &metadata,
            },
            deadline,
        )
    })
    .await?;

    let view = MessageView::new(recorded.message.clone(), Some(UserProfile::from(sender)));
    broadcast::message_created(state.hub.as_ref(), &view);

    tracing::info!(
        message_id = %view.id,
        conversation_id = %view.conversation_id,
        sender_id = %view.sender_id,
        receiver_id = %view.receiver_id,
        created = recorded.conversation_created,
        "Message sent"
    );

    record_delivery_side_effects(state, sender, &recorded.message).await;

    Ok(SentMessage {
        message: view,
        conversation: recorded.conversation,
        conversation_created: recorded.conversation_created,
    })
}

/// Notification for the receiver plus an activity entry for the sender.
/// The message is already durable, so failures here are only logged.
async fn record_delivery_side_effects(state: &AppState, sender: &User, message: &Message) {
    let preview: String = message.content.chars().take(NOTIFICATION_PREVIEW_CHARS).collect();
    let notification = Notification {
        id: uuid::Uuid::now_v7().to_string(),
        user_id: message.receiver_id.clone(),
        kind: "message".to_string(),
        title: format!("New message from {}", sender.display_name),
        body: preview,
        conversation_id: Some(message.conversation_id.clone()),
        message_id: Some(message.id.clone()),
        sender_id: Some(sender.id.clone()),
        is_read: false,
        created_at: now_timestamp(),
    };

    let stored = notification.clone();
    let sender_id = sender.id.clone();
    let message_id = message.id.clone();
    let details = json!({
        "conversationId": message.conversation_id,
        "receiverId": message.receiver_id,
    });

    let result = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        store::insert_notification(conn, &stored)?;
        store::record_activity(conn, &sender_id, "message_sent", "message", &message_id, &details)?;
        Ok(())
    })
    .await;

    match result {
        Ok(()) => broadcast::notification(
            state.hub.as_ref(),
            &notification.user_id,
            NotificationView::from(notification.clone()),
        ),
        Err(e) => tracing::warn!(
            message_id = %message.id,
            error = %e,
            "Failed to record notification for sent message"
        ),
    }
}

/// Mark the caller's unread messages in a conversation as read and tell the peer.
pub async fn mark_read(
    state: &AppState,
    reader: &User,
    conversation_id: &str,
    message_ids: Option<Vec<String>>,
) -> Result<ReadAck, ChatError> {
    let conversation = authorized_conversation(state, reader, conversation_id).await?;
    let Some(peer_id) = conversation.other_participant(&reader.id).map(str::to_string) else {
        // Administrators pass the lookup but are never a receiver here.
        return Err(ChatError::Authorization);
    };

    let read_at = now_timestamp();
    let conv_id = conversation.id.clone();
    let reader_id = reader.id.clone();
    let at = read_at.clone();
    let affected = db::run_until(&state.db, state.chat.db_timeout(), move |conn, deadline| {
        store::mark_read(conn, &conv_id, &reader_id, message_ids.as_deref(), &at, deadline)
    })
    .await?;

    if !affected.is_empty() {
        tracing::debug!(
            conversation_id = %conversation.id,
            reader_id = %reader.id,
            count = affected.len(),
            "Messages marked read"
        );
        broadcast::read_receipt(
            state.hub.as_ref(),
            &peer_id,
            ReadReceipt {
                conversation_id: conversation.id.clone(),
                reader_id: reader.id.clone(),
                read_count: affected.len(),
                message_ids: affected.clone(),
                read_at,
            },
        );
    }

    Ok(ReadAck {
        conversation_id: conversation.id,
        count: affected.len(),
    })
}

/// One page of history, oldest first, with sender profiles attached.
pub async fn load_conversation(
    state: &AppState,
    viewer: &User,
    conversation_id: &str,
    page: Option<u32>,
    limit: Option<u32>,
) -> Result<ConversationPage, ChatError> {
    let conversation = authorized_conversation(state, viewer, conversation_id).await?;
    let (page, limit) = state.chat.page_window(page, limit);

    let conv = conversation.clone();
    let (messages, people) = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        let messages = store::load_page(conn, &conv.id, page, limit)?;
        let people = profiles(conn, &conv.participants())?;
        Ok((messages, people))
    })
    .await?;

    let has_more = messages.len() == limit as usize;
    let messages = messages
        .into_iter()
        .map(|m| {
            let sender = people.get(&m.sender_id).cloned();
            MessageView::new(m, sender)
        })
        .collect();

    Ok(ConversationPage {
        conversation_id: conversation.id,
        messages,
        page,
        limit,
        has_more,
    })
}

/// Soft delete by the sender, or hard delete by an administrator.
pub async fn delete_message(
    state: &AppState,
    caller: &User,
    message_id: &str,
    delete_for_everyone: bool,
) -> Result<DeletedNotice, ChatError> {
    let id = message_id.to_string();
    let caller_id = caller.id.clone();
    let is_admin = caller.is_admin();

    let (notice, participants) = db::run_until(&state.db, state.chat.db_timeout(), move |conn, deadline| {
        let message = store::find_message(conn, &id)?.ok_or(ChatError::NotFound("message"))?;

        let mode = if is_admin && delete_for_everyone {
            DeleteMode::Hard
        } else if message.sender_id == caller_id {
            DeleteMode::Soft
        } else {
            return Err(ChatError::Authorization);
        };

        let deleted_at = now_timestamp();
        let view = match mode {
            DeleteMode::Soft => {
                let updated = store::soft_delete(conn, &message, &caller_id, &deleted_at, deadline)?;
                let sender = users::find_user(conn, &updated.sender_id)?;
                Some(MessageView::new(updated, sender.as_ref().map(UserProfile::from)))
            }
            DeleteMode::Hard => {
                store::hard_delete(conn, &message, deadline)?;
                None
            }
        };

        let details = json!({
            "conversationId": message.conversation_id,
            "mode": mode,
        });
        if let Err(e) =
            store::record_activity(conn, &caller_id, "message_deleted", "message", &message.id, &details)
        {
            tracing::warn!(message_id = %message.id, error = %e, "Failed to log message deletion");
        }

        let notice = DeletedNotice {
            message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            mode,
            deleted_by: caller_id.clone(),
            message: view,
        };
        Ok((notice, [message.sender_id, message.receiver_id]))
    })
    .await
    .inspect_err(|e| {
        if matches!(e, ChatError::Authorization) {
            tracing::warn!(user_id = %caller.id, message_id = %message_id, "Message delete denied");
        }
    })?;

    broadcast::message_deleted(
        state.hub.as_ref(),
        [participants[0].as_str(), participants[1].as_str()],
        &notice,
    );

    tracing::info!(
        message_id = %notice.message_id,
        conversation_id = %notice.conversation_id,
        mode = ?notice.mode,
        deleted_by = %notice.deleted_by,
        "Message deleted"
    );

    Ok(notice)
}
