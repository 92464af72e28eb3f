//! Persistence for conversations, messages, notifications and the activity log.
//!
//! Everything here is synchronous and takes a `rusqlite::Connection`; callers
//! run it through `db::run` so it stays off the async runtime and is bounded
//! by the configured timeout.

use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::{Map, Value};

use crate::db::Deadline;
use crate::db::models::{now_timestamp, Conversation, Message, MessageType, Notification};
use crate::error::ChatError;

/// Content written over a soft-deleted message.
pub const TOMBSTONE: &str = "This message was deleted";

const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, last_message_id, last_activity, message_count, created_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sequence, sender_id, receiver_id, content, \
     message_type, metadata, is_read, read_at, created_at";

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, kind, title, body, conversation_id, message_id, sender_id, is_read, created_at";

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        last_message_id: row.get(3)?,
        last_activity: row.get(4)?,
        message_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let message_type: String = row.get(6)?;
    let metadata: String = row.get(7)?;
    let metadata: Map<String, Value> = serde_json::from_str(&metadata).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sequence: row.get(2)?,
        sender_id: row.get(3)?,
        receiver_id: row.get(4)?,
        content: row.get(5)?,
        message_type: MessageType::parse(&message_type).unwrap_or_default(),
        metadata,
        is_read: row.get::<_, i64>(8)? != 0,
        read_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn row_to_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        conversation_id: row.get(5)?,
        message_id: row.get(6)?,
        sender_id: row.get(7)?,
        is_read: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
    })
}

/// Normalize an unordered pair: lexicographically smaller id first.
pub fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// `LIMIT`/`OFFSET` for a 1-based page.
fn page_bounds(page: u32, limit: u32) -> (i64, i64) {
    let limit = i64::from(limit.max(1));
    let offset = i64::from(page.max(1) - 1) * limit;
    (limit, offset)
}

// --- Conversations ---

pub fn find_conversation(conn: &Connection, id: &str) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
        rusqlite::params![id],
        row_to_conversation,
    )
    .optional()
}

pub fn find_conversation_between(
    conn: &Connection,
    a: &str,
    b: &str,
) -> rusqlite::Result<Option<Conversation>> {
    let (first, second) = ordered_pair(a, b);
    conn.query_row(
        &format!(
            "SELECT {} FROM conversations WHERE participant_a = ?1 AND participant_b = ?2",
            CONVERSATION_COLUMNS
        ),
        rusqlite::params![first, second],
        row_to_conversation,
    )
    .optional()
}

/// Idempotent find-or-create keyed by the unordered pair.
/// Returns the conversation and whether this call created it.
pub fn find_or_create_conversation(
    conn: &Connection,
    a: &str,
    b: &str,
) -> Result<(Conversation, bool), ChatError> {
    if a == b {
        return Err(ChatError::validation("Cannot start a conversation with yourself"));
    }
    let (first, second) = ordered_pair(a, b);
    let now = now_timestamp();

    // The unique (participant_a, participant_b) index makes this race-free.
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conversations
            (id, participant_a, participant_b, last_message_id, last_activity, message_count, created_at)
         VALUES (?1, ?2, ?3, NULL, ?4, 0, ?4)",
        rusqlite::params![uuid::Uuid::now_v7().to_string(), first, second, now],
    )?;

    let conversation = find_conversation_between(conn, first, second)?
        .ok_or(ChatError::NotFound("conversation"))?;
    Ok((conversation, inserted == 1))
}

/// Conversations a user takes part in, most recently active first.
pub fn list_conversations_for(
    conn: &Connection,
    user_id: &str,
    page: u32,
    limit: u32,
) -> rusqlite::Result<Vec<Conversation>> {
    let (limit, offset) = page_bounds(page, limit);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM conversations
         WHERE participant_a = ?1 OR participant_b = ?1
         ORDER BY last_activity DESC, id DESC
         LIMIT ?2 OFFSET ?3",
        CONVERSATION_COLUMNS
    ))?;
    let rows = stmt.query_map(rusqlite::params![user_id, limit, offset], row_to_conversation)?;
    rows.collect()
}

/// Every conversation in the system, most recently active first (moderation view).
pub fn list_all_conversations(
    conn: &Connection,
    page: u32,
    limit: u32,
) -> rusqlite::Result<Vec<Conversation>> {
    let (limit, offset) = page_bounds(page, limit);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM conversations
         ORDER BY last_activity DESC, id DESC
         LIMIT ?1 OFFSET ?2",
        CONVERSATION_COLUMNS
    ))?;
    let rows = stmt.query_map(rusqlite::params![limit, offset], row_to_conversation)?;
    rows.collect()
}

/// Users sharing at least one conversation with `user_id`.
pub fn conversation_peers(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT participant_b FROM conversations WHERE participant_a = ?1
         UNION
         SELECT participant_a FROM conversations WHERE participant_b = ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![user_id], |row| row.get::<_, String>(0))?;
    rows.collect()
}

// --- Messages ---

/// Input for `record_message`.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub conversation_id: Option<&'a str>,
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub content: &'a str,
    pub message_type: MessageType,
    pub metadata: &'a Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub message: Message,
    pub conversation: Conversation,
    pub conversation_created: bool,
}

/// Persist a message and advance its conversation as one transaction.
///
/// A named conversation that exists must have sender and receiver as its two
/// participants; a missing or unknown one is resolved by find-or-create.
/// Rolls back with `ChatError::Timeout` if `deadline` passes before commit.
pub fn record_message(
    conn: &mut Connection,
    new: &NewMessage<'_>,
    deadline: Deadline,
) -> Result<RecordedMessage, ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing = match new.conversation_id {
        Some(id) => find_conversation(&tx, id)?,
        None => None,
    };

    let (conversation, conversation_created) = match existing {
        Some(conv) => {
            if !conv.has_participant(new.sender_id) {
                return Err(ChatError::Authorization);
            }
            if conv.other_participant(new.sender_id) != Some(new.receiver_id) {
                return Err(ChatError::validation(
                    "Receiver is not a participant of this conversation",
                ));
            }
            (conv, false)
        }
        None => find_or_create_conversation(&tx, new.sender_id, new.receiver_id)?,
    };

    let now = now_timestamp();
    let sequence = conversation.message_count + 1;
    let message = Message {
        id: uuid::Uuid::now_v7().to_string(),
        conversation_id: conversation.id.clone(),
        sequence,
        sender_id: new.sender_id.to_string(),
        receiver_id: new.receiver_id.to_string(),
        content: new.content.to_string(),
        message_type: new.message_type,
        metadata: new.metadata.clone(),
        is_read: false,
        read_at: None,
        created_at: now.clone(),
    };

    tx.execute(
        &format!(
            "INSERT INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9)",
            MESSAGE_COLUMNS
        ),
        rusqlite::params![
            message.id,
            message.conversation_id,
            message.sequence,
            message.sender_id,
            message.receiver_id,
            message.content,
            message.message_type.as_str(),
            serde_json::to_string(&message.metadata)?,
            message.created_at,
        ],
    )?;

    tx.execute(
        "UPDATE conversations
         SET last_message_id = ?1,
             last_activity = MAX(last_activity, ?2),
             message_count = message_count + 1
         WHERE id = ?3",
        rusqlite::params![message.id, now, conversation.id],
    )?;

    let conversation = find_conversation(&tx, &conversation.id)?
        .ok_or(ChatError::NotFound("conversation"))?;

    deadline.check()?;
    tx.commit()?;

    Ok(RecordedMessage {
        message,
        conversation,
        conversation_created,
    })
}

pub fn find_message(conn: &Connection, id: &str) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
        rusqlite::params![id],
        row_to_message,
    )
    .optional()
}

pub fn last_message(conn: &Connection, conversation: &Conversation) -> rusqlite::Result<Option<Message>> {
    match &conversation.last_message_id {
        Some(id) => find_message(conn, id),
        None => Ok(None),
    }
}

/// One page of history, returned oldest first. Page 1 holds the newest `limit` messages.
pub fn load_page(
    conn: &Connection,
    conversation_id: &str,
    page: u32,
    limit: u32,
) -> rusqlite::Result<Vec<Message>> {
    let (limit, offset) = page_bounds(page, limit);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages
         WHERE conversation_id = ?1
         ORDER BY sequence DESC
         LIMIT ?2 OFFSET ?3",
        MESSAGE_COLUMNS
    ))?;
    let mut messages: Vec<Message> = stmt
        .query_map(rusqlite::params![conversation_id, limit, offset], row_to_message)?
        .collect::<rusqlite::Result<_>>()?;
    messages.reverse();
    Ok(messages)
}

/// Mark unread messages addressed to `reader_id` as read.
/// Returns the ids that flipped; already-read messages are never touched.
pub fn mark_read(
    conn: &mut Connection,
    conversation_id: &str,
    reader_id: &str,
    only: Option<&[String]>,
    read_at: &str,
    deadline: Deadline,
) -> Result<Vec<String>, ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let candidates: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM messages
             WHERE conversation_id = ?1 AND receiver_id = ?2 AND is_read = 0
             ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id, reader_id], |row| {
            row.get::<_, String>(0)
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let affected: Vec<String> = match only {
        Some(ids) => candidates.into_iter().filter(|id| ids.contains(id)).collect(),
        None => candidates,
    };

    {
        let mut update = tx.prepare(
            "UPDATE messages SET is_read = 1, read_at = ?1 WHERE id = ?2 AND is_read = 0",
        )?;
        for id in &affected {
            update.execute(rusqlite::params![read_at, id])?;
        }
    }

    deadline.check()?;
    tx.commit()?;
    Ok(affected)
}

/// Replace content with the tombstone, keeping the record and its position.
pub fn soft_delete(
    conn: &Connection,
    message: &Message,
    deleted_by: &str,
    deleted_at: &str,
    deadline: Deadline,
) -> Result<Message, ChatError> {
    let mut metadata = message.metadata.clone();
    metadata.insert("deleted".into(), Value::Bool(true));
    metadata.insert("deletedAt".into(), Value::String(deleted_at.to_string()));
    metadata.insert("deletedBy".into(), Value::String(deleted_by.to_string()));

    deadline.check()?;
    conn.execute(
        "UPDATE messages SET content = ?1, message_type = ?2, metadata = ?3 WHERE id = ?4",
        rusqlite::params![
            TOMBSTONE,
            MessageType::System.as_str(),
            serde_json::to_string(&metadata)?,
            message.id,
        ],
    )?;

    Ok(Message {
        content: TOMBSTONE.to_string(),
        message_type: MessageType::System,
        metadata,
        ..message.clone()
    })
}

/// Remove the record. If it was the conversation's last message, point
/// `last_message_id` at the newest survivor. `message_count` is left alone.
pub fn hard_delete(conn: &mut Connection, message: &Message, deadline: Deadline) -> Result<(), ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute("DELETE FROM messages WHERE id = ?1", rusqlite::params![message.id])?;
    tx.execute(
        "UPDATE conversations
         SET last_message_id = (
             SELECT id FROM messages WHERE conversation_id = ?1 ORDER BY sequence DESC LIMIT 1
         )
         WHERE id = ?1 AND last_message_id = ?2",
        rusqlite::params![message.conversation_id, message.id],
    )?;
    deadline.check()?;
    tx.commit()?;
    Ok(())
}

pub fn unread_count_for(conn: &Connection, user_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND is_read = 0",
        rusqlite::params![user_id],
        |row| row.get(0),
    )
}

pub fn unread_in_conversation(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND receiver_id = ?2 AND is_read = 0",
        rusqlite::params![conversation_id, user_id],
        |row| row.get(0),
    )
}

// --- Side effects ---

pub fn insert_notification(conn: &Connection, notification: &Notification) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO notifications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            NOTIFICATION_COLUMNS
        ),
        rusqlite::params![
            notification.id,
            notification.user_id,
            notification.kind,
            notification.title,
            notification.body,
            notification.conversation_id,
            notification.message_id,
            notification.sender_id,
            notification.is_read as i64,
            notification.created_at,
        ],
    )?;
    Ok(())
}

pub fn list_notifications(
    conn: &Connection,
    user_id: &str,
    page: u32,
    limit: u32,
) -> rusqlite::Result<Vec<Notification>> {
    let (limit, offset) = page_bounds(page, limit);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2 OFFSET ?3",
        NOTIFICATION_COLUMNS
    ))?;
    let rows = stmt.query_map(rusqlite::params![user_id, limit, offset], row_to_notification)?;
    rows.collect()
}

pub fn record_activity(
    conn: &Connection,
    user_id: &str,
    action: &str,
    target_type: &str,
    target_id: &str,
    details: &Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO activity_log (id, user_id, action, target_type, target_id, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            uuid::Uuid::now_v7().to_string(),
            user_id,
            action,
            target_type,
            target_id,
            details.to_string(),
            now_timestamp(),
        ],
    )?;
    Ok(())
}
