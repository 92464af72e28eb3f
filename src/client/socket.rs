//! Socket half of the client: emits `ClientEvent`s and yields decoded `ServerEvent`s.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::ClientError;
use crate::proto::{ClientEvent, ServerEvent};

pub struct SocketClient {
    outbound: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SocketClient {
    /// Connect to `ws_url` (e.g. `ws://host:port/ws`), authenticating with `?token=`.
    pub async fn connect(ws_url: &str, token: &str) -> Result<Self, ClientError> {
        let url = format!("{}?token={}", ws_url, token);
        let (stream, _) = connect_async(url.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events) = mpsc::unbounded_channel::<ServerEvent>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => {
                            if events_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Undecodable server event"),
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(reason = ?frame, "Server closed socket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "Socket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outbound,
            events,
            reader,
            writer,
        })
    }

    pub fn emit(&self, event: &ClientEvent) -> Result<(), ClientError> {
        let text = serde_json::to_string(event)?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| ClientError::Closed)
    }

    /// Next decoded server event, or `None` once the socket is gone.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Receiver of decoded server events, for callers that drive it themselves.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<ServerEvent> {
        &mut self.events
    }

    pub async fn close(self) {
        let _ = self.outbound.send(Message::Close(None));
        // Give the writer a moment to flush the close frame.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(200), self.writer).await;
        self.reader.abort();
    }
}
