//! Connection Registry and channel multicast.
//!
//! `ChannelHub` is the seam between handlers and delivery. The in-process
//! implementation keeps everything in `DashMap`s, so live delivery only
//! reaches sockets held by this process. A broker-backed implementation
//! (publish to `user:{id}` on a shared bus, each node forwarding to the
//! sockets it holds) can be dropped in behind the same trait.

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::collections::HashSet;

use super::{ConnectionHandle, ConnectionId};
use crate::proto::ServerEvent;

pub trait ChannelHub: Send + Sync {
    /// Register a live connection. It receives nothing until subscribed.
    fn attach(&self, conn: ConnectionHandle);

    /// Drop a connection and all its subscriptions.
    /// Returns the channels it was subscribed to.
    fn detach(&self, conn_id: ConnectionId) -> Vec<String>;

    /// Returns false if the connection is not attached.
    fn subscribe(&self, channel: &str, conn_id: ConnectionId) -> bool;

    /// Returns false if the connection was not subscribed.
    fn unsubscribe(&self, channel: &str, conn_id: ConnectionId) -> bool;

    /// Fire-and-forget delivery to every subscriber of `channel`, optionally
    /// skipping one connection. Returns how many connections were handed the event.
    fn publish(&self, channel: &str, event: &ServerEvent, except: Option<ConnectionId>) -> usize;

    /// Deliver to every attached connection.
    fn broadcast(&self, event: &ServerEvent) -> usize;

    /// Deliver to one connection.
    fn send_to(&self, conn_id: ConnectionId, event: &ServerEvent) -> bool;

    fn subscriber_count(&self, channel: &str) -> usize;

    /// Distinct user ids subscribed to `channel`.
    fn subscribers(&self, channel: &str) -> Vec<String>;

    fn is_subscribed(&self, channel: &str, conn_id: ConnectionId) -> bool;
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "Failed to encode event");
            None
        }
    }
}

/// Single-process hub.
#[derive(Debug, Default)]
pub struct InProcessHub {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    channels: DashMap<String, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<String>>,
}

impl InProcessHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn deliver(&self, targets: &[ConnectionId], msg: &Message) -> usize {
        let mut delivered = 0;
        for id in targets {
            if let Some(conn) = self.connections.get(id) {
                // A closed receiver means the socket is going away; drop silently.
                if conn.sender.send(msg.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

impl ChannelHub for InProcessHub {
    fn attach(&self, conn: ConnectionHandle) {
        tracing::debug!(
            connection_id = %conn.id,
            user_id = %conn.user_id,
            "Connection attached"
        );
        self.memberships.entry(conn.id).or_default();
        self.connections.insert(conn.id, conn);
    }

    fn detach(&self, conn_id: ConnectionId) -> Vec<String> {
        self.connections.remove(&conn_id);
        let channels: Vec<String> = self
            .memberships
            .remove(&conn_id)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();

        for channel in &channels {
            let mut now_empty = false;
            if let Some(mut members) = self.channels.get_mut(channel) {
                members.remove(&conn_id);
                now_empty = members.is_empty();
            }
            if now_empty {
                self.channels.remove_if(channel, |_, members| members.is_empty());
            }
        }

        tracing::debug!(
            connection_id = %conn_id,
            channels = channels.len(),
            "Connection detached"
        );
        channels
    }

    fn subscribe(&self, channel: &str, conn_id: ConnectionId) -> bool {
        match self.memberships.get_mut(&conn_id) {
            Some(mut joined) => {
                joined.insert(channel.to_string());
            }
            None => return false,
        }
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(conn_id);
        true
    }

    fn unsubscribe(&self, channel: &str, conn_id: ConnectionId) -> bool {
        if let Some(mut joined) = self.memberships.get_mut(&conn_id) {
            joined.remove(channel);
        }
        let mut removed = false;
        let mut now_empty = false;
        if let Some(mut members) = self.channels.get_mut(channel) {
            removed = members.remove(&conn_id);
            now_empty = members.is_empty();
        }
        if now_empty {
            self.channels.remove_if(channel, |_, members| members.is_empty());
        }
        removed
    }

    fn publish(&self, channel: &str, event: &ServerEvent, except: Option<ConnectionId>) -> usize {
        // Snapshot targets so no map guard is held while sending.
        let targets: Vec<ConnectionId> = match self.channels.get(channel) {
            Some(members) => members
                .iter()
                .copied()
                .filter(|id| Some(*id) != except)
                .collect(),
            None => return 0,
        };
        if targets.is_empty() {
            return 0;
        }
        match encode(event) {
            Some(msg) => self.deliver(&targets, &msg),
            None => 0,
        }
    }

    fn broadcast(&self, event: &ServerEvent) -> usize {
        let targets: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        match encode(event) {
            Some(msg) => self.deliver(&targets, &msg),
            None => 0,
        }
    }

    fn send_to(&self, conn_id: ConnectionId, event: &ServerEvent) -> bool {
        match encode(event) {
            Some(msg) => self.deliver(&[conn_id], &msg) == 1,
            None => false,
        }
    }

    fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|m| m.len()).unwrap_or(0)
    }

    fn subscribers(&self, channel: &str) -> Vec<String> {
        let ids: Vec<ConnectionId> = match self.channels.get(channel) {
            Some(members) => members.iter().copied().collect(),
            None => return Vec::new(),
        };
        let mut users: Vec<String> = ids
            .iter()
            .filter_map(|id| self.connections.get(id).map(|c| c.user_id.clone()))
            .collect();
        users.sort();
        users.dedup();
        users
    }

    fn is_subscribed(&self, channel: &str, conn_id: ConnectionId) -> bool {
        self.channels
            .get(channel)
            .map(|m| m.contains(&conn_id))
            .unwrap_or(false)
    }
}
