//! Room Handler: per-conversation multicast groups and the administrator
//! monitoring channel.

use crate::chat::conversations;
use crate::chat::messages;
use crate::chat::{authorized_conversation, profiles, require_admin, store};
use crate::db::{self, models::User};
use crate::error::ChatError;
use crate::proto::views::{
    ConversationList, ConversationPage, Participant, ParticipantList, RoomAck, RoomMember,
    UserProfile,
};
use crate::proto::ServerEvent;
use crate::state::AppState;
use crate::ws::{is_online, monitor_channel, room_channel, room_conversation_id, ConnectionId};

/// Subscribe the connection to the conversation's room and tell the other members.
pub async fn join(
    state: &AppState,
    user: &User,
    conn_id: ConnectionId,
    conversation_id: &str,
) -> Result<RoomAck, ChatError> {
    let conversation = authorized_conversation(state, user, conversation_id).await?;
    let channel = room_channel(&conversation.id);

    if !state.hub.is_subscribed(&channel, conn_id) {
        state.hub.subscribe(&channel, conn_id);
        state.hub.publish(
            &channel,
            &ServerEvent::RoomUserJoined(RoomMember {
                conversation_id: conversation.id.clone(),
                user: UserProfile::from(user),
            }),
            Some(conn_id),
        );
        tracing::debug!(
            user_id = %user.id,
            connection_id = %conn_id,
            conversation_id = %conversation.id,
            "Joined room"
        );
    }

    Ok(RoomAck {
        conversation_id: conversation.id,
    })
}

/// Leave a room. Leaving a room never joined is acknowledged without a notice.
pub fn leave(
    state: &AppState,
    user: &User,
    conn_id: ConnectionId,
    conversation_id: &str,
) -> RoomAck {
    let channel = room_channel(conversation_id);
    if state.hub.unsubscribe(&channel, conn_id) {
        state.hub.publish(
            &channel,
            &ServerEvent::RoomUserLeft(RoomMember {
                conversation_id: conversation_id.to_string(),
                user: UserProfile::from(user),
            }),
            None,
        );
    }
    RoomAck {
        conversation_id: conversation_id.to_string(),
    }
}

/// After a disconnect: tell every room the connection had joined that it is gone.
pub fn announce_departure(state: &AppState, user: &User, channels: &[String]) {
    for conversation_id in channels.iter().filter_map(|c| room_conversation_id(c)) {
        state.hub.publish(
            &room_channel(conversation_id),
            &ServerEvent::RoomUserLeft(RoomMember {
                conversation_id: conversation_id.to_string(),
                user: UserProfile::from(user),
            }),
            None,
        );
    }
}

/// Both participants with a best-effort online flag computed at call time.
pub async fn participants(
    state: &AppState,
    user: &User,
    conversation_id: &str,
) -> Result<ParticipantList, ChatError> {
    let conversation = authorized_conversation(state, user, conversation_id).await?;
    let ids = [
        conversation.participant_a.clone(),
        conversation.participant_b.clone(),
    ];
    let people = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        Ok(profiles(conn, &[ids[0].as_str(), ids[1].as_str()])?)
    })
    .await?;

    let participants = conversation
        .participants()
        .iter()
        .filter_map(|id| people.get(*id).cloned())
        .map(|profile| Participant {
            online: is_online(state.hub.as_ref(), &profile.id),
            profile,
        })
        .collect();

    Ok(ParticipantList {
        conversation_id: conversation.id,
        participants,
    })
}

/// Silently observe a conversation. Administrators only; no join notice is sent.
pub async fn admin_join(
    state: &AppState,
    user: &User,
    conn_id: ConnectionId,
    conversation_id: &str,
) -> Result<RoomAck, ChatError> {
    require_admin(user)?;
    let id = conversation_id.to_string();
    let conversation = db::run(&state.db, state.chat.db_timeout(), move |conn| {
        store::find_conversation(conn, &id)?.ok_or(ChatError::NotFound("conversation"))
    })
    .await?;

    state.hub.subscribe(&monitor_channel(&conversation.id), conn_id);
    tracing::info!(
        admin_id = %user.id,
        conversation_id = %conversation.id,
        "Administrator monitoring conversation"
    );

    Ok(RoomAck {
        conversation_id: conversation.id,
    })
}

/// `admin_join` followed by the newest page of history.
pub async fn admin_monitor(
    state: &AppState,
    user: &User,
    conn_id: ConnectionId,
    conversation_id: &str,
) -> Result<(RoomAck, ConversationPage), ChatError> {
    let ack = admin_join(state, user, conn_id, conversation_id).await?;
    let page = messages::load_conversation(state, user, &ack.conversation_id, None, None).await?;
    Ok((ack, page))
}

/// System-wide conversation listing for moderation.
pub async fn admin_list(
    state: &AppState,
    user: &User,
    page: Option<u32>,
    limit: Option<u32>,
) -> Result<ConversationList, ChatError> {
    conversations::list_all(state, user, page, limit).await
}
