//! Shared harness: a real server on an ephemeral port backed by a temp data dir.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use marketchat_server::auth::jwt::{issue_access_token, load_or_generate_jwt_secret};
use marketchat_server::config::ChatConfig;
use marketchat_server::db::models::{Role, User};
use marketchat_server::db::{self, users};
use marketchat_server::routes::build_router;
use marketchat_server::state::AppState;
use marketchat_server::ws;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for an expected event before failing.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _data_dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ChatConfig::default()).await
    }

    pub async fn start_with(chat: ChatConfig) -> Self {
        let data_dir = TempDir::new().unwrap();
        let dir = data_dir.path().to_str().unwrap().to_string();

        let db = db::init_db(&dir).unwrap();
        let secret = load_or_generate_jwt_secret(&dir).unwrap();
        let state = AppState::new(db, secret, ws::new_hub(), chat);
        let app = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            addr,
            state,
            _data_dir: data_dir,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Insert a user and return it with a fresh access token.
    pub fn add_user(&self, display_name: &str, role: Role) -> (User, String) {
        let user = {
            let conn = self.state.db.lock().unwrap();
            users::insert_user(&conn, display_name, None, None, role).unwrap()
        };
        let token = self.token_for(&user.id, role, 900);
        (user, token)
    }

    pub fn token_for(&self, user_id: &str, role: Role, ttl_secs: i64) -> String {
        issue_access_token(&self.state.jwt_secret, user_id, role, ttl_secs).unwrap()
    }

    /// Open an authenticated socket and consume `connection:established`.
    pub async fn connect(&self, token: &str) -> WsStream {
        let mut ws = self.connect_raw(token).await;
        next_event_named(&mut ws, "connection:established").await;
        ws
    }

    pub async fn connect_raw(&self, token: &str) -> WsStream {
        let url = format!("{}?token={}", self.ws_url(), token);
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .expect("Failed to connect to WebSocket");
        ws
    }

    pub fn http(&self) -> reqwest::Client {
        reqwest::Client::new()
    }
}

pub async fn emit(ws: &mut WsStream, event: &str, data: Value) {
    let frame = serde_json::json!({ "event": event, "data": data });
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Read frames until an event with `name` arrives; returns its `data`.
pub async fn next_event_named(ws: &mut WsStream, name: &str) -> Value {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let frame = tokio::time::timeout_at(deadline, ws.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", name));
        match frame {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["event"] == name {
                    return value["data"].clone();
                }
            }
            Some(Ok(Message::Close(frame))) => panic!("Socket closed waiting for {}: {:?}", name, frame),
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("Socket error waiting for {}: {}", name, e),
            None => panic!("Socket ended waiting for {}", name),
        }
    }
}

/// Assert no event named `name` arrives within `wait`.
pub async fn assert_no_event_named(ws: &mut WsStream, name: &str, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_ne!(value["event"], name, "Unexpected {}: {}", name, value);
            }
            Ok(Some(Ok(_))) => {}
            Ok(_) => return,
        }
    }
}

/// POST /api/conversations as `token`, returning the conversation id.
pub async fn create_conversation(server: &TestServer, token: &str, participant_id: &str) -> String {
    let resp = server
        .http()
        .post(format!("{}/api/conversations", server.base_url()))
        .bearer_auth(token)
        .json(&serde_json::json!({ "participantId": participant_id }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "create failed: {}", resp.status());
    let body: Value = resp.json().await.unwrap();
    body["conversation"]["id"].as_str().unwrap().to_string()
}

/// POST /api/messages as `token`, returning the stored message.
pub async fn send_rest(server: &TestServer, token: &str, receiver_id: &str, content: &str) -> Value {
    let resp = server
        .http()
        .post(format!("{}/api/messages", server.base_url()))
        .bearer_auth(token)
        .json(&serde_json::json!({ "receiverId": receiver_id, "content": content }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}
