//! Typing indicator expiry.
//!
//! The server only relays `typing:start` / `typing:stop`; a start with no
//! matching stop must still disappear on the receiving side. This tracker is
//! the one place that rule lives.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Silence after which a typing indicator is considered stopped.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
pub struct TypingTracker {
    /// (conversation_id, user_id) -> expiry deadline
    deadlines: HashMap<(String, String), Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a start, or refresh the deadline of an ongoing one.
    pub fn start(&mut self, conversation_id: &str, user_id: &str) {
        self.deadlines.insert(
            (conversation_id.to_string(), user_id.to_string()),
            Instant::now() + TYPING_EXPIRY,
        );
    }

    pub fn stop(&mut self, conversation_id: &str, user_id: &str) {
        self.deadlines
            .remove(&(conversation_id.to_string(), user_id.to_string()));
    }

    pub fn is_typing(&self, conversation_id: &str, user_id: &str) -> bool {
        self.deadlines
            .get(&(conversation_id.to_string(), user_id.to_string()))
            .is_some_and(|deadline| *deadline > Instant::now())
    }

    /// Users currently typing in a conversation, sorted.
    pub fn typing_in(&self, conversation_id: &str) -> Vec<String> {
        let now = Instant::now();
        let mut users: Vec<String> = self
            .deadlines
            .iter()
            .filter(|((conv, _), deadline)| conv == conversation_id && **deadline > now)
            .map(|((_, user), _)| user.clone())
            .collect();
        users.sort();
        users
    }

    /// Drop expired entries, returning the (conversation_id, user_id) pairs removed.
    pub fn prune(&mut self) -> Vec<(String, String)> {
        let now = Instant::now();
        let expired: Vec<(String, String)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.deadlines.remove(key);
        }
        expired
    }
}
