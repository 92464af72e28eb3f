//! Server-side presence tracking, typing relay and heartbeat.
//!
//! In-memory presence store (DashMap) keyed by user id. Presence changes are
//! published either to every connection or, with the `conversations` scope,
//! only to users who share a conversation with the subject.

use chrono::Utc;
use std::collections::HashSet;

use crate::chat::store;
use crate::config::PresenceScope;
use crate::db::{self, models::User};
use crate::error::ChatError;
use crate::proto::events::TypingRequest;
use crate::proto::views::{HeartbeatAck, PresenceNotice, PresenceStatus, StatusNotice, TypingNotice};
use crate::proto::ServerEvent;
use crate::state::AppState;
use crate::ws::{is_online, user_channel, ConnectionId};

/// Info tracked per user in the presence map.
#[derive(Debug, Clone)]
pub struct PresenceInfo {
    pub status: PresenceStatus,
    pub display_name: String,
    /// Unix millis of the last status change.
    pub last_seen: i64,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Users allowed to see `user_id`'s presence. `None` means everyone.
async fn audience(state: &AppState, user_id: &str) -> Result<Option<HashSet<String>>, ChatError> {
    match state.chat.presence_scope {
        PresenceScope::Global => Ok(None),
        PresenceScope::Conversations => {
            let subject = user_id.to_string();
            let peers = db::run(&state.db, state.chat.db_timeout(), move |conn| {
                Ok(store::conversation_peers(conn, &subject)?)
            })
            .await?;
            let mut visible: HashSet<String> = peers.into_iter().collect();
            visible.insert(user_id.to_string());
            Ok(Some(visible))
        }
    }
}

/// Deliver a presence-class event about `subject_id` to its audience.
async fn publish(state: &AppState, subject_id: &str, event: &ServerEvent) {
    match audience(state, subject_id).await {
        Ok(None) => {
            state.hub.broadcast(event);
        }
        Ok(Some(users)) => {
            for user_id in users {
                state.hub.publish(&user_channel(&user_id), event, None);
            }
        }
        Err(e) => tracing::warn!(
            user_id = %subject_id,
            error = %e,
            "Failed to resolve presence audience"
        ),
    }
}

fn store_status(state: &AppState, user: &User, status: PresenceStatus) -> PresenceInfo {
    let info = PresenceInfo {
        status,
        display_name: user.display_name.clone(),
        last_seen: now_millis(),
    };
    state.presence.insert(user.id.clone(), info.clone());
    info
}

fn presence_event(user_id: &str, info: &PresenceInfo) -> ServerEvent {
    ServerEvent::PresenceUpdate(PresenceNotice {
        user_id: user_id.to_string(),
        display_name: info.display_name.clone(),
        status: info.status,
        last_seen: info.last_seen,
    })
}

/// Mark the user online, announce it, and send the new connection a snapshot.
pub async fn connect(state: &AppState, user: &User, conn_id: ConnectionId) {
    let info = store_status(state, user, PresenceStatus::Online);
    publish(state, &user.id, &presence_event(&user.id, &info)).await;

    let visible = match audience(state, &user.id).await {
        Ok(visible) => visible,
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "Skipping presence snapshot");
            return;
        }
    };

    // Collect first so no map guard is held while sending.
    let snapshot: Vec<ServerEvent> = state
        .presence
        .iter()
        .filter(|entry| entry.key() != &user.id)
        .filter(|entry| visible.as_ref().map_or(true, |v| v.contains(entry.key())))
        .map(|entry| presence_event(entry.key(), entry.value()))
        .collect();

    for event in &snapshot {
        state.hub.send_to(conn_id, event);
    }
}

/// Called after a connection has been detached. Goes offline only when it was
/// the user's last one.
pub async fn disconnect(state: &AppState, user: &User) {
    let Some(info) = mark_offline_if_idle(state, user) else {
        return;
    };
    publish(state, &user.id, &presence_event(&user.id, &info)).await;

    // A reconnect may have announced itself before the offline event went out.
    if is_online(state.hub.as_ref(), &user.id) {
        let current = state.presence.get(&user.id).map(|entry| entry.value().clone());
        if let Some(current) = current.filter(|p| p.status != PresenceStatus::Offline) {
            publish(state, &user.id, &presence_event(&user.id, &current)).await;
        }
    }
}

/// Store Offline unless the user has a live connection. The check and the
/// write happen under the presence entry lock, so a reconnect's Online write
/// is never overwritten.
fn mark_offline_if_idle(state: &AppState, user: &User) -> Option<PresenceInfo> {
    let entry = state.presence.entry(user.id.clone());
    if is_online(state.hub.as_ref(), &user.id) {
        return None;
    }
    let info = PresenceInfo {
        status: PresenceStatus::Offline,
        display_name: user.display_name.clone(),
        last_seen: now_millis(),
    };
    entry.insert(info.clone());
    Some(info)
}

fn settable(status: PresenceStatus) -> Result<PresenceStatus, ChatError> {
    match status {
        PresenceStatus::Offline => Err(ChatError::validation("Invalid status")),
        other => Ok(other),
    }
}

/// `user:status` → `user:status:update`.
pub async fn update_status(
    state: &AppState,
    user: &User,
    status: PresenceStatus,
) -> Result<(), ChatError> {
    let info = store_status(state, user, settable(status)?);
    let event = ServerEvent::UserStatusUpdate(StatusNotice {
        user_id: user.id.clone(),
        status: info.status,
        timestamp: info.last_seen,
    });
    publish(state, &user.id, &event).await;
    tracing::debug!(user_id = %user.id, status = info.status.as_str(), "Status updated");
    Ok(())
}

/// `presence:update` → `presence:update`.
pub async fn update_presence(
    state: &AppState,
    user: &User,
    status: PresenceStatus,
) -> Result<(), ChatError> {
    let info = store_status(state, user, settable(status)?);
    publish(state, &user.id, &presence_event(&user.id, &info)).await;
    Ok(())
}

/// Relay a typing signal to the named receiver's personal channel only.
/// Expiry is the receiving client's job.
pub fn relay_typing(
    state: &AppState,
    user: &User,
    req: TypingRequest,
    started: bool,
) -> Result<(), ChatError> {
    let receiver_id = req.receiver_id.trim();
    if receiver_id.is_empty() {
        return Err(ChatError::validation("receiverId is required"));
    }
    if receiver_id == user.id {
        return Err(ChatError::validation("Cannot send typing to yourself"));
    }

    let notice = TypingNotice {
        conversation_id: req.conversation_id,
        user_id: user.id.clone(),
        display_name: user.display_name.clone(),
    };
    let event = if started {
        ServerEvent::TypingStart(notice)
    } else {
        ServerEvent::TypingStop(notice)
    };
    state.hub.publish(&user_channel(receiver_id), &event, None);
    Ok(())
}

pub fn heartbeat_ack() -> ServerEvent {
    ServerEvent::HeartbeatAck(HeartbeatAck {
        timestamp: now_millis(),
    })
}
