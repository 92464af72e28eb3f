//! Client-side query cache with stale marking.

use std::collections::HashMap;

use crate::proto::views::{ConversationList, ConversationPage, NotificationList, UnreadCount};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Conversations,
    Messages(String),
    UnreadCount,
    Notifications,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    Conversations(ConversationList),
    Messages(ConversationPage),
    UnreadCount(UnreadCount),
    Notifications(NotificationList),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Option<QueryData>,
    stale: bool,
}

/// Tracked queries. A key is tracked once watched or set; only tracked keys
/// can be invalidated and refetched.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<QueryKey, Entry>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a key. It is stale until its first fetch.
    pub fn watch(&mut self, key: QueryKey) {
        self.entries.entry(key).or_insert(Entry {
            data: None,
            stale: true,
        });
    }

    pub fn get(&self, key: &QueryKey) -> Option<&QueryData> {
        self.entries.get(key).and_then(|e| e.data.as_ref())
    }

    /// Store a fresh value.
    pub fn set(&mut self, key: QueryKey, data: QueryData) {
        self.entries.insert(
            key,
            Entry {
                data: Some(data),
                stale: false,
            },
        );
    }

    /// Mark a tracked key stale. Returns false if the key is not tracked.
    pub fn invalidate(&mut self, key: &QueryKey) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    pub fn invalidate_all(&mut self) -> Vec<QueryKey> {
        self.entries
            .iter_mut()
            .map(|(key, entry)| {
                entry.stale = true;
                key.clone()
            })
            .collect()
    }

    pub fn remove(&mut self, key: &QueryKey) -> Option<QueryData> {
        self.entries.remove(key).and_then(|e| e.data)
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.stale)
    }

    pub fn stale_keys(&self) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.stale)
            .map(|(k, _)| k.clone())
            .collect()
    }
}
