use crate::chat::{messages, presence, rooms};
use crate::db::models::User;
use crate::error::ChatError;
use crate::proto::{decode_client_frame, ClientEvent, ServerEvent};
use crate::state::AppState;
use crate::ws::ConnectionId;

/// Handle an incoming text frame.
/// Decodes the event, dispatches it, and sends any replies to this connection only.
pub async fn handle_text_message(text: &str, state: &AppState, user: &User, conn_id: ConnectionId) {
    let event = match decode_client_frame(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %user.id,
                event = ?e.event,
                error = %e.reason,
                "Failed to decode client frame"
            );
            let message = match e.event {
                Some(ref name) if is_known_event(name) => "Invalid payload",
                Some(_) => "Unknown event",
                None => "Invalid message format",
            };
            state
                .hub
                .send_to(conn_id, &ServerEvent::error(message, e.event.as_deref()));
            return;
        }
    };

    let name = event.name();
    tracing::debug!(user_id = %user.id, connection_id = %conn_id, event = name, "Dispatching");

    match dispatch(event, state, user, conn_id).await {
        Ok(replies) => {
            for reply in &replies {
                state.hub.send_to(conn_id, reply);
            }
        }
        Err(e) => {
            match &e {
                ChatError::Persistence(_) | ChatError::Timeout => {
                    tracing::error!(user_id = %user.id, event = name, error = %e, "Handler failed")
                }
                _ => tracing::debug!(user_id = %user.id, event = name, error = %e, "Handler rejected"),
            }
            state
                .hub
                .send_to(conn_id, &ServerEvent::error(e.client_message(), Some(name)));
        }
    }
}

fn is_known_event(name: &str) -> bool {
    matches!(
        name,
        "message:send"
            | "message:markRead"
            | "message:delete"
            | "conversation:load"
            | "room:join"
            | "room:leave"
            | "room:participants"
            | "typing:start"
            | "typing:stop"
            | "user:status"
            | "presence:update"
            | "heartbeat"
            | "admin:room:join"
            | "admin:conversations:list"
            | "admin:conversation:monitor"
    )
}

/// Dispatch a decoded event to the appropriate handler.
/// Returns the replies addressed to the calling connection.
async fn dispatch(
    event: ClientEvent,
    state: &AppState,
    user: &User,
    conn_id: ConnectionId,
) -> Result<Vec<ServerEvent>, ChatError> {
    let replies = match event {
        ClientEvent::MessageSend(req) => {
            // The sender's confirmation arrives through its personal channel.
            messages::send_message(state, user, req).await?;
            vec![]
        }
        ClientEvent::MessageMarkRead(req) => {
            let ack =
                messages::mark_read(state, user, &req.conversation_id, req.message_ids).await?;
            vec![ServerEvent::MessageMarkedRead(ack)]
        }
        ClientEvent::MessageDelete(req) => {
            let notice =
                messages::delete_message(state, user, &req.message_id, req.delete_for_everyone)
                    .await?;
            vec![ServerEvent::MessageDeleteSuccess(notice)]
        }
        ClientEvent::ConversationLoad(req) => {
            let page =
                messages::load_conversation(state, user, &req.conversation_id, req.page, req.limit)
                    .await?;
            vec![ServerEvent::ConversationLoaded(page)]
        }
        ClientEvent::RoomJoin(req) => {
            let ack = rooms::join(state, user, conn_id, &req.conversation_id).await?;
            vec![ServerEvent::RoomJoined(ack)]
        }
        ClientEvent::RoomLeave(req) => {
            vec![ServerEvent::RoomLeft(rooms::leave(state, user, conn_id, &req.conversation_id))]
        }
        ClientEvent::RoomParticipants(req) => {
            let list = rooms::participants(state, user, &req.conversation_id).await?;
            vec![ServerEvent::RoomParticipants(list)]
        }
        ClientEvent::TypingStart(req) => {
            presence::relay_typing(state, user, req, true)?;
            vec![]
        }
        ClientEvent::TypingStop(req) => {
            presence::relay_typing(state, user, req, false)?;
            vec![]
        }
        ClientEvent::UserStatus(req) => {
            presence::update_status(state, user, req.status).await?;
            vec![]
        }
        ClientEvent::PresenceUpdate(req) => {
            presence::update_presence(state, user, req.status).await?;
            vec![]
        }
        ClientEvent::Heartbeat(_) => vec![presence::heartbeat_ack()],
        ClientEvent::AdminRoomJoin(req) => {
            let ack = rooms::admin_join(state, user, conn_id, &req.conversation_id).await?;
            vec![ServerEvent::RoomJoined(ack)]
        }
        ClientEvent::AdminConversationsList(req) => {
            let list = rooms::admin_list(state, user, req.page, req.limit).await?;
            vec![ServerEvent::AdminConversations(list)]
        }
        ClientEvent::AdminConversationMonitor(req) => {
            let (ack, page) = rooms::admin_monitor(state, user, conn_id, &req.conversation_id).await?;
            vec![ServerEvent::RoomJoined(ack), ServerEvent::ConversationLoaded(page)]
        }
    };
    Ok(replies)
}
