pub mod actor;
pub mod handler;
pub mod hub;
pub mod protocol;

use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use hub::{ChannelHub, InProcessHub};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Identifies one live socket (a user may hold several).
pub type ConnectionId = Uuid;

/// Shared handle to whichever hub implementation the server runs with.
pub type SharedHub = Arc<dyn ChannelHub>;

/// Registry entry for one authenticated connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub sender: ConnectionSender,
}

/// Create the default in-process hub.
pub fn new_hub() -> SharedHub {
    Arc::new(InProcessHub::new())
}

/// Role channel every administrator connection joins.
pub const ADMIN_CHANNEL: &str = "admin";

/// Personal delivery channel of a user.
pub fn user_channel(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Multicast group of one conversation.
pub fn room_channel(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

/// Silent administrator observation channel of one conversation.
pub fn monitor_channel(conversation_id: &str) -> String {
    format!("admin:conversation:{}", conversation_id)
}

/// Conversation id of a room channel name, if it is one.
pub fn room_conversation_id(channel: &str) -> Option<&str> {
    channel.strip_prefix("conversation:")
}

/// Whether at least one connection of `user_id` is registered right now.
pub fn is_online(hub: &dyn ChannelHub, user_id: &str) -> bool {
    hub.subscriber_count(&user_channel(user_id)) > 0
}
