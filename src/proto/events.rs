//! Socket event envelopes.
//!
//! Every frame is a JSON text frame `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};

use super::views::*;
use crate::db::models::MessageType;

// --- Inbound payloads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageRequest {
    pub conversation_id: Option<String>,
    pub receiver_id: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub message_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageRequest {
    pub message_id: String,
    #[serde(default)]
    pub delete_for_everyone: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadConversationRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub conversation_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HeartbeatPing {
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Client → server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "message:send")]
    MessageSend(SendMessageRequest),
    #[serde(rename = "message:markRead")]
    MessageMarkRead(MarkReadRequest),
    #[serde(rename = "message:delete")]
    MessageDelete(DeleteMessageRequest),
    #[serde(rename = "conversation:load")]
    ConversationLoad(LoadConversationRequest),
    #[serde(rename = "room:join")]
    RoomJoin(ConversationRef),
    #[serde(rename = "room:leave")]
    RoomLeave(ConversationRef),
    #[serde(rename = "room:participants")]
    RoomParticipants(ConversationRef),
    #[serde(rename = "typing:start")]
    TypingStart(TypingRequest),
    #[serde(rename = "typing:stop")]
    TypingStop(TypingRequest),
    #[serde(rename = "user:status")]
    UserStatus(StatusRequest),
    #[serde(rename = "presence:update")]
    PresenceUpdate(StatusRequest),
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatPing),
    #[serde(rename = "admin:room:join")]
    AdminRoomJoin(ConversationRef),
    #[serde(rename = "admin:conversations:list")]
    AdminConversationsList(PageRequest),
    #[serde(rename = "admin:conversation:monitor")]
    AdminConversationMonitor(ConversationRef),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSend(_) => "message:send",
            Self::MessageMarkRead(_) => "message:markRead",
            Self::MessageDelete(_) => "message:delete",
            Self::ConversationLoad(_) => "conversation:load",
            Self::RoomJoin(_) => "room:join",
            Self::RoomLeave(_) => "room:leave",
            Self::RoomParticipants(_) => "room:participants",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
            Self::UserStatus(_) => "user:status",
            Self::PresenceUpdate(_) => "presence:update",
            Self::Heartbeat(_) => "heartbeat",
            Self::AdminRoomJoin(_) => "admin:room:join",
            Self::AdminConversationsList(_) => "admin:conversations:list",
            Self::AdminConversationMonitor(_) => "admin:conversation:monitor",
        }
    }
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connection:established")]
    ConnectionEstablished(ConnectionInfo),
    #[serde(rename = "message:sent")]
    MessageSent(MessageView),
    #[serde(rename = "message:received")]
    MessageReceived(MessageView),
    #[serde(rename = "message:read")]
    MessageRead(ReadReceipt),
    #[serde(rename = "message:marked_read")]
    MessageMarkedRead(ReadAck),
    #[serde(rename = "message:deleted")]
    MessageDeleted(DeletedNotice),
    #[serde(rename = "message:delete_success")]
    MessageDeleteSuccess(DeletedNotice),
    #[serde(rename = "conversation:loaded")]
    ConversationLoaded(ConversationPage),
    #[serde(rename = "room:joined")]
    RoomJoined(RoomAck),
    #[serde(rename = "room:left")]
    RoomLeft(RoomAck),
    #[serde(rename = "room:user_joined")]
    RoomUserJoined(RoomMember),
    #[serde(rename = "room:user_left")]
    RoomUserLeft(RoomMember),
    #[serde(rename = "room:participants")]
    RoomParticipants(ParticipantList),
    #[serde(rename = "typing:start")]
    TypingStart(TypingNotice),
    #[serde(rename = "typing:stop")]
    TypingStop(TypingNotice),
    #[serde(rename = "user:status:update")]
    UserStatusUpdate(StatusNotice),
    #[serde(rename = "presence:update")]
    PresenceUpdate(PresenceNotice),
    #[serde(rename = "heartbeat:ack")]
    HeartbeatAck(HeartbeatAck),
    #[serde(rename = "notification:new")]
    NotificationNew(NotificationView),
    #[serde(rename = "admin:conversations")]
    AdminConversations(ConversationList),
    #[serde(rename = "error")]
    Error(ErrorNotice),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished(_) => "connection:established",
            Self::MessageSent(_) => "message:sent",
            Self::MessageReceived(_) => "message:received",
            Self::MessageRead(_) => "message:read",
            Self::MessageMarkedRead(_) => "message:marked_read",
            Self::MessageDeleted(_) => "message:deleted",
            Self::MessageDeleteSuccess(_) => "message:delete_success",
            Self::ConversationLoaded(_) => "conversation:loaded",
            Self::RoomJoined(_) => "room:joined",
            Self::RoomLeft(_) => "room:left",
            Self::RoomUserJoined(_) => "room:user_joined",
            Self::RoomUserLeft(_) => "room:user_left",
            Self::RoomParticipants(_) => "room:participants",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
            Self::UserStatusUpdate(_) => "user:status:update",
            Self::PresenceUpdate(_) => "presence:update",
            Self::HeartbeatAck(_) => "heartbeat:ack",
            Self::NotificationNew(_) => "notification:new",
            Self::AdminConversations(_) => "admin:conversations",
            Self::Error(_) => "error",
        }
    }

    pub fn error(message: impl Into<String>, event: Option<&str>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
            event: event.map(str::to_string),
        })
    }
}

/// Reason an inbound frame could not be turned into a `ClientEvent`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameError {
    /// Event name, when the frame got far enough to carry one.
    pub event: Option<String>,
    pub reason: String,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode a text frame. A missing or null `data` is treated as `{}`.
pub fn decode_client_frame(text: &str) -> Result<ClientEvent, FrameError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| FrameError {
        event: None,
        reason: e.to_string(),
    })?;

    let data = match raw.data {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    };

    serde_json::from_value(serde_json::json!({ "event": raw.event, "data": data })).map_err(|e| {
        FrameError {
            event: Some(raw.event),
            reason: e.to_string(),
        }
    })
}
