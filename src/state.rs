use dashmap::DashMap;
use std::sync::Arc;

use crate::chat::presence::PresenceInfo;
use crate::config::ChatConfig;
use crate::db::DbPool;
use crate::ws::SharedHub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret, same trust root as the REST session credential
    pub jwt_secret: Vec<u8>,
    /// Connection registry + channel multicast
    pub hub: SharedHub,
    /// In-memory presence tracking: user_id -> PresenceInfo
    pub presence: Arc<DashMap<String, PresenceInfo>>,
    /// Messaging limits and timeouts
    pub chat: Arc<ChatConfig>,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, hub: SharedHub, chat: ChatConfig) -> Self {
        Self {
            db,
            jwt_secret,
            hub,
            presence: Arc::new(DashMap::new()),
            chat: Arc::new(chat),
        }
    }
}
