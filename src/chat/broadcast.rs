//! Fan-out helpers for chat events.
//! Each wraps a view in its `ServerEvent` and publishes it to the right channels.
//! Delivery is fire-and-forget: an absent subscriber simply gets nothing.

use crate::proto::views::{DeletedNotice, MessageView, NotificationView, ReadReceipt};
use crate::proto::ServerEvent;
use crate::ws::{monitor_channel, user_channel, ChannelHub};

/// Publish a freshly persisted message: sender confirmation, peer delivery,
/// and one copy for administrators monitoring the conversation.
pub fn message_created(hub: &dyn ChannelHub, message: &MessageView) {
    let sent = hub.publish(
        &user_channel(&message.sender_id),
        &ServerEvent::MessageSent(message.clone()),
        None,
    );
    let received = ServerEvent::MessageReceived(message.clone());
    let delivered = hub.publish(&user_channel(&message.receiver_id), &received, None);
    hub.publish(&monitor_channel(&message.conversation_id), &received, None);

    tracing::debug!(
        message_id = %message.id,
        conversation_id = %message.conversation_id,
        sender_connections = sent,
        receiver_connections = delivered,
        "Message fanned out"
    );
}

/// Tell the other participant their messages were read.
pub fn read_receipt(hub: &dyn ChannelHub, peer_id: &str, receipt: ReadReceipt) {
    hub.publish(&user_channel(peer_id), &ServerEvent::MessageRead(receipt), None);
}

/// Notify both participants (and monitors) of a deletion.
pub fn message_deleted(hub: &dyn ChannelHub, participants: [&str; 2], notice: &DeletedNotice) {
    let event = ServerEvent::MessageDeleted(notice.clone());
    for user_id in participants {
        hub.publish(&user_channel(user_id), &event, None);
    }
    hub.publish(&monitor_channel(&notice.conversation_id), &event, None);
}

pub fn notification(hub: &dyn ChannelHub, user_id: &str, notification: NotificationView) {
    hub.publish(
        &user_channel(user_id),
        &ServerEvent::NotificationNew(notification),
        None,
    );
}
