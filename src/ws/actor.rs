use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::chat::{presence, rooms};
use crate::db::models::User;
use crate::proto::views::{ConnectionInfo, UserProfile};
use crate::proto::ServerEvent;
use crate::state::AppState;
use crate::ws::{protocol, user_channel, ConnectionHandle, ADMIN_CHANNEL};

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes incoming frames, dispatches one at a time
///
/// The mpsc sender is registered in the hub, so any handler can reach this
/// client by publishing to a channel it is subscribed to.
pub async fn run_connection(socket: WebSocket, state: AppState, user: User) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = Uuid::new_v4();

    // Register, then join the personal and (for administrators) role channels
    state.hub.attach(ConnectionHandle {
        id: conn_id,
        user_id: user.id.clone(),
        sender: tx.clone(),
    });
    state.hub.subscribe(&user_channel(&user.id), conn_id);
    if user.is_admin() {
        state.hub.subscribe(ADMIN_CHANNEL, conn_id);
    }

    state.hub.send_to(
        conn_id,
        &ServerEvent::ConnectionEstablished(ConnectionInfo {
            connection_id: conn_id.to_string(),
            user: UserProfile::from(&user),
        }),
    );

    // Broadcast ONLINE presence and send the snapshot to this connection
    presence::connect(&state, &user, conn_id).await;

    tracing::info!(
        user_id = %user.id,
        connection_id = %conn_id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_interval = state.chat.ping_interval();
    let pong_timeout = state.chat.pong_timeout();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(connection_id = %conn_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &state, &user, conn_id).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = %user.id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user.id,
                        connection_id = %conn_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user.id,
                    connection_id = %conn_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user.id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Unregister; rooms it had joined learn it left
    let channels = state.hub.detach(conn_id);
    rooms::announce_departure(&state, &user, &channels);

    // Only goes OFFLINE if this was the user's last connection
    presence::disconnect(&state, &user).await;

    tracing::info!(
        user_id = %user.id,
        connection_id = %conn_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
