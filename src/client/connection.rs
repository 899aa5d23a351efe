use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::ClientError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::services::{SeatService, Session, OUTBOUND_QUEUE};

/// Соединение клиента с координатором: пара каналов сообщений протокола.
///
/// Создаётся явно и передаётся в `SeatClient`; глобального сокета нет,
/// поэтому в одном процессе можно поднять сколько угодно клиентов.
pub struct Connection {
    outbound: UnboundedSender<ClientMessage>,
    inbound: Receiver<ServerMessage>,
}

impl Connection {
    pub fn new(
        outbound: UnboundedSender<ClientMessage>,
        inbound: Receiver<ServerMessage>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// In-process connection: a server `Session` on a spawned task.
    pub fn local(service: Arc<SeatService>) -> Self {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::channel(OUTBOUND_QUEUE);
        tokio::spawn(Session::new(service).run(client_rx, server_tx));
        Self::new(client_tx, server_rx)
    }

    /// Подключение к `ws://host/api/ws`.
    pub async fn websocket(url: &str) -> Result<Self, ClientError> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut source) = socket.split();
        let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (server_tx, server_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

        tokio::spawn(async move {
            while let Some(msg) = client_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to serialize client message: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(msg) => {
                                if server_tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Unreadable server message: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self::new(client_tx, server_rx))
    }

    pub fn into_parts(self) -> (UnboundedSender<ClientMessage>, Receiver<ServerMessage>) {
        (self.outbound, self.inbound)
    }
}
