//! Reconciliation of push events against the pull API.

use std::collections::HashMap;

use super::api::PullApi;
use super::cache::{QueryCache, QueryData, QueryKey};
use super::typing::TypingTracker;
use super::ClientError;
use crate::proto::views::PresenceStatus;
use crate::proto::ServerEvent;

/// Treats every push event as a hint about which cached queries went stale,
/// and refetches those from `A`. Push payloads never reach the cache.
pub struct ReconciliationBridge<A: PullApi> {
    api: A,
    cache: QueryCache,
    typing: TypingTracker,
    presence: HashMap<String, PresenceStatus>,
}

impl<A: PullApi> ReconciliationBridge<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            cache: QueryCache::new(),
            typing: TypingTracker::new(),
            presence: HashMap::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    pub fn presence(&self, user_id: &str) -> Option<PresenceStatus> {
        self.presence.get(user_id).copied()
    }

    /// Track a query so it is fetched on the next `refresh`.
    pub fn watch(&mut self, key: QueryKey) {
        self.cache.watch(key);
    }

    /// Cache keys a push event makes stale.
    pub fn affected_keys(event: &ServerEvent) -> Vec<QueryKey> {
        let conversation_keys = |conversation_id: &str| {
            vec![
                QueryKey::Messages(conversation_id.to_string()),
                QueryKey::Conversations,
                QueryKey::UnreadCount,
            ]
        };
        match event {
            ServerEvent::MessageSent(m) | ServerEvent::MessageReceived(m) => {
                conversation_keys(&m.conversation_id)
            }
            ServerEvent::MessageRead(r) => conversation_keys(&r.conversation_id),
            ServerEvent::MessageMarkedRead(a) => conversation_keys(&a.conversation_id),
            // A removed message may have been the receiver's last unread one.
            ServerEvent::MessageDeleted(n) | ServerEvent::MessageDeleteSuccess(n) => {
                conversation_keys(&n.conversation_id)
            }
            ServerEvent::NotificationNew(_) => {
                vec![QueryKey::Notifications, QueryKey::UnreadCount]
            }
            _ => vec![],
        }
    }

    /// Apply one push event. Returns the cached keys it marked stale.
    pub fn handle_event(&mut self, event: &ServerEvent) -> Vec<QueryKey> {
        match event {
            // Anything may have been missed while disconnected.
            ServerEvent::ConnectionEstablished(_) => return self.cache.invalidate_all(),
            ServerEvent::TypingStart(t) => self.typing.start(&t.conversation_id, &t.user_id),
            ServerEvent::TypingStop(t) => self.typing.stop(&t.conversation_id, &t.user_id),
            ServerEvent::MessageReceived(m) => self.typing.stop(&m.conversation_id, &m.sender_id),
            ServerEvent::PresenceUpdate(p) => {
                self.presence.insert(p.user_id.clone(), p.status);
            }
            ServerEvent::UserStatusUpdate(s) => {
                self.presence.insert(s.user_id.clone(), s.status);
            }
            _ => {}
        }

        Self::affected_keys(event)
            .into_iter()
            .filter(|key| self.cache.invalidate(key))
            .collect()
    }

    /// Refetch every stale key. Returns how many were refreshed.
    /// A failed fetch leaves its key stale and aborts the pass.
    pub async fn refresh(&mut self) -> Result<usize, ClientError> {
        let stale = self.cache.stale_keys();
        for key in &stale {
            let data = match key {
                QueryKey::Conversations => QueryData::Conversations(self.api.conversations().await?),
                QueryKey::Messages(id) => QueryData::Messages(self.api.messages(id).await?),
                QueryKey::UnreadCount => QueryData::UnreadCount(self.api.unread_count().await?),
                QueryKey::Notifications => {
                    QueryData::Notifications(self.api.notifications().await?)
                }
            };
            self.cache.set(key.clone(), data);
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MessageType, Role};
    use crate::proto::views::*;
    use std::sync::{Arc, Mutex};

    /// Authoritative state the fake pull API serves.
    #[derive(Default)]
    struct Store {
        messages: Vec<MessageView>,
        unread: i64,
        notifications: Vec<NotificationView>,
    }

    #[derive(Clone, Default)]
    struct FakeApi {
        store: Arc<Mutex<Store>>,
    }

    impl PullApi for FakeApi {
        async fn conversations(&self) -> Result<ConversationList, ClientError> {
            let store = self.store.lock().unwrap();
            let conversations = if store.messages.is_empty() {
                vec![]
            } else {
                vec![ConversationSummary {
                    id: "c1".into(),
                    participants: vec![],
                    last_message: store.messages.last().map(|m| LastMessage {
                        id: m.id.clone(),
                        sender_id: m.sender_id.clone(),
                        content: m.content.clone(),
                        message_type: m.message_type,
                        created_at: m.created_at.clone(),
                    }),
                    last_activity: "t".into(),
                    message_count: store.messages.len() as i64,
                    unread_count: store.unread,
                    created_at: "t".into(),
                }]
            };
            Ok(ConversationList {
                conversations,
                page: 1,
                limit: 50,
                has_more: false,
            })
        }

        async fn messages(&self, conversation_id: &str) -> Result<ConversationPage, ClientError> {
            let store = self.store.lock().unwrap();
            Ok(ConversationPage {
                conversation_id: conversation_id.to_string(),
                messages: store.messages.clone(),
                page: 1,
                limit: 50,
                has_more: false,
            })
        }

        async fn unread_count(&self) -> Result<UnreadCount, ClientError> {
            Ok(UnreadCount {
                count: self.store.lock().unwrap().unread,
            })
        }

        async fn notifications(&self) -> Result<NotificationList, ClientError> {
            Ok(NotificationList {
                notifications: self.store.lock().unwrap().notifications.clone(),
                page: 1,
                limit: 50,
                has_more: false,
            })
        }
    }

    fn message(n: usize) -> MessageView {
        MessageView {
            id: format!("m{}", n),
            conversation_id: "c1".into(),
            sequence: n as i64,
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            sender: Some(UserProfile {
                id: "alice".into(),
                display_name: "Alice".into(),
                avatar: None,
                role: Role::Seeker,
            }),
            content: format!("hello {}", n),
            message_type: MessageType::Text,
            metadata: Default::default(),
            is_read: false,
            read_at: None,
            created_at: format!("t{}", n),
        }
    }

    /// Server-side effect of one send, plus the push event it would produce.
    fn server_send(api: &FakeApi, n: usize) -> ServerEvent {
        let mut store = api.store.lock().unwrap();
        let m = message(n);
        store.messages.push(m.clone());
        store.unread += 1;
        ServerEvent::MessageReceived(m)
    }

    fn watch_all(bridge: &mut ReconciliationBridge<FakeApi>) {
        bridge.watch(QueryKey::Conversations);
        bridge.watch(QueryKey::Messages("c1".into()));
        bridge.watch(QueryKey::UnreadCount);
        bridge.watch(QueryKey::Notifications);
    }

    async fn assert_matches_store(bridge: &ReconciliationBridge<FakeApi>) {
        let api = bridge.api();
        assert_eq!(
            bridge.cache().get(&QueryKey::Messages("c1".into())),
            Some(&QueryData::Messages(api.messages("c1").await.unwrap()))
        );
        assert_eq!(
            bridge.cache().get(&QueryKey::Conversations),
            Some(&QueryData::Conversations(api.conversations().await.unwrap()))
        );
        assert_eq!(
            bridge.cache().get(&QueryKey::UnreadCount),
            Some(&QueryData::UnreadCount(api.unread_count().await.unwrap()))
        );
    }

    #[tokio::test]
    async fn refetched_state_matches_store_for_any_delivered_subset() {
        // Deliver every k-th push event, dropping the rest.
        for stride in 1..=4 {
            let api = FakeApi::default();
            let mut bridge = ReconciliationBridge::new(api.clone());
            watch_all(&mut bridge);
            bridge.refresh().await.unwrap();

            for n in 1..=9 {
                let event = server_send(&api, n);
                if n % stride == 0 {
                    bridge.handle_event(&event);
                }
            }
            // The last send is always delivered, so the cache knows it is behind.
            let last = server_send(&api, 10);
            bridge.handle_event(&last);
            bridge.refresh().await.unwrap();

            assert_matches_store(&bridge).await;
        }
    }

    #[tokio::test]
    async fn reconnect_recovers_from_dropped_events() {
        let api = FakeApi::default();
        let mut bridge = ReconciliationBridge::new(api.clone());
        watch_all(&mut bridge);
        bridge.refresh().await.unwrap();

        // Three sends while the socket was down: nothing delivered.
        for n in 1..=3 {
            server_send(&api, n);
        }
        assert!(bridge.cache().stale_keys().is_empty());

        let invalidated = bridge.handle_event(&ServerEvent::ConnectionEstablished(ConnectionInfo {
            connection_id: "x".into(),
            user: message(0).sender.unwrap(),
        }));
        assert_eq!(invalidated.len(), 4);
        assert_eq!(bridge.refresh().await.unwrap(), 4);

        assert_matches_store(&bridge).await;
    }

    #[tokio::test]
    async fn push_payload_is_never_cached() {
        let api = FakeApi::default();
        let mut bridge = ReconciliationBridge::new(api.clone());
        watch_all(&mut bridge);
        bridge.refresh().await.unwrap();

        // A push for a message the store does not have (e.g. duplicated or bogus).
        bridge.handle_event(&ServerEvent::MessageReceived(message(42)));
        bridge.refresh().await.unwrap();

        match bridge.cache().get(&QueryKey::Messages("c1".into())) {
            Some(QueryData::Messages(page)) => assert!(page.messages.is_empty()),
            other => panic!("unexpected cache entry {:?}", other),
        }
    }

    #[tokio::test]
    async fn notification_invalidates_only_its_queries() {
        let api = FakeApi::default();
        let mut bridge = ReconciliationBridge::new(api.clone());
        watch_all(&mut bridge);
        bridge.refresh().await.unwrap();

        let keys = bridge.handle_event(&ServerEvent::NotificationNew(NotificationView {
            id: "n1".into(),
            kind: "message".into(),
            title: "New message from Alice".into(),
            body: "hi".into(),
            conversation_id: Some("c1".into()),
            message_id: Some("m1".into()),
            sender_id: Some("alice".into()),
            is_read: false,
            created_at: "t".into(),
        }));
        assert_eq!(keys, vec![QueryKey::Notifications, QueryKey::UnreadCount]);
        assert!(!bridge.cache().is_stale(&QueryKey::Conversations));
    }

    #[tokio::test]
    async fn hard_delete_refreshes_unread_count() {
        let api = FakeApi::default();
        let mut bridge = ReconciliationBridge::new(api.clone());
        watch_all(&mut bridge);
        let sent = server_send(&api, 1);
        bridge.handle_event(&sent);
        bridge.refresh().await.unwrap();
        assert_eq!(
            bridge.cache().get(&QueryKey::UnreadCount),
            Some(&QueryData::UnreadCount(UnreadCount { count: 1 }))
        );

        {
            let mut store = api.store.lock().unwrap();
            store.messages.clear();
            store.unread = 0;
        }
        let keys = bridge.handle_event(&ServerEvent::MessageDeleted(DeletedNotice {
            message_id: "m1".into(),
            conversation_id: "c1".into(),
            mode: DeleteMode::Hard,
            deleted_by: "admin".into(),
            message: None,
        }));
        assert!(keys.contains(&QueryKey::UnreadCount));
        bridge.refresh().await.unwrap();

        assert_matches_store(&bridge).await;
        assert_eq!(
            bridge.cache().get(&QueryKey::UnreadCount),
            Some(&QueryData::UnreadCount(UnreadCount { count: 0 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn typing_and_presence_do_not_touch_cache() {
        let mut bridge = ReconciliationBridge::new(FakeApi::default());
        watch_all(&mut bridge);
        bridge.refresh().await.unwrap();

        let typing = TypingNotice {
            conversation_id: "c1".into(),
            user_id: "alice".into(),
            display_name: "Alice".into(),
        };
        assert!(bridge.handle_event(&ServerEvent::TypingStart(typing)).is_empty());
        assert!(bridge.typing().is_typing("c1", "alice"));

        tokio::time::advance(crate::client::TYPING_EXPIRY).await;
        assert!(!bridge.typing().is_typing("c1", "alice"));

        bridge.handle_event(&ServerEvent::PresenceUpdate(PresenceNotice {
            user_id: "alice".into(),
            display_name: "Alice".into(),
            status: PresenceStatus::Away,
            last_seen: 0,
        }));
        assert_eq!(bridge.presence("alice"), Some(PresenceStatus::Away));
        assert!(bridge.cache().stale_keys().is_empty());
    }
}
