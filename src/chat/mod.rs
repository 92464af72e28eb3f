//! Messaging core: chat, room, presence and typing handlers.
//!
//! Handlers here are transport-agnostic. The socket dispatcher and the REST
//! endpoints call the same functions, so both paths persist and fan out
//! identically.

pub mod broadcast;
pub mod conversations;
pub mod messages;
pub mod presence;
pub mod rooms;
pub mod store;

use std::collections::HashMap;

use crate::db::models::{Conversation, User};
use crate::db::{self, users};
use crate::error::ChatError;
use crate::proto::views::UserProfile;
use crate::state::AppState;

/// Participants may access a conversation; administrators may access any.
pub fn authorize_participant(conversation: &Conversation, user: &User) -> Result<(), ChatError> {
    if conversation.has_participant(&user.id) || user.is_admin() {
        Ok(())
    } else {
        Err(ChatError::Authorization)
    }
}

/// Administrator-only operations.
pub fn require_admin(user: &User) -> Result<(), ChatError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ChatError::Authorization)
    }
}

/// Fetch a conversation and run the participant check before anything else is read.
pub async fn authorized_conversation(
    state: &AppState,
    user: &User,
    conversation_id: &str,
) -> Result<Conversation, ChatError> {
    let id = conversation_id.to_string();
    let conversation = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        store::find_conversation(conn, &id)?.ok_or(ChatError::NotFound("conversation"))
    })
    .await?;

    if let Err(e) = authorize_participant(&conversation, user) {
        tracing::warn!(
            user_id = %user.id,
            conversation_id = %conversation.id,
            "Conversation access denied"
        );
        return Err(e);
    }
    Ok(conversation)
}

/// Public profiles of the given users, keyed by id.
pub(crate) fn profiles(
    conn: &rusqlite::Connection,
    ids: &[&str],
) -> rusqlite::Result<HashMap<String, UserProfile>> {
    Ok(users::find_users(conn, ids)?
        .iter()
        .map(|u| (u.id.clone(), UserProfile::from(u)))
        .collect())
}
