//! WebSocket-шина схемы зала: `GET /api/ws`.
//!
//! На каждое подключение три задачи: читатель кадров, писатель кадров и
//! серверная `Session` между ними. Чтение рассылок никогда не блокирует
//! обработку намерений и наоборот.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::services::{SeatService, Session, OUTBOUND_QUEUE};
use crate::AppState;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

const MAX_CONNECTIONS: usize = 10_000;

/// Занятое место в лимите соединений; освобождается при drop, в том числе
/// если апгрейд так и не состоялся.
struct ConnectionSlot {
    counter: &'static AtomicUsize,
}

impl ConnectionSlot {
    fn try_acquire(counter: &'static AtomicUsize, max: usize) -> Option<Self> {
        let previous = counter.fetch_add(1, Ordering::AcqRel);
        if previous >= max {
            counter.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self { counter })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(seat_socket))
}

async fn seat_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = ConnectionSlot::try_acquire(&ACTIVE_CONNECTIONS, MAX_CONNECTIONS) else {
        warn!("WebSocket connection limit reached ({})", MAX_CONNECTIONS);
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    let service = state.seats.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, service, slot))
}

async fn handle_socket(socket: WebSocket, service: Arc<SeatService>, _slot: ConnectionSlot) {
    let session = Session::new(service);
    let session_id = session.id();
    info!("🔌 WebSocket {} connected", session_id);

    let (mut sink, mut stream) = socket.split();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize message for {}: {}", session_id, e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                // Подписчик отвалился: состояние уже закоммичено, он догонит снапшотом
                warn!("WebSocket {} send failed: {}", session_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let errors = out_tx.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(msg) => {
                        if in_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // ответ на мусор не важнее дельт: при полной очереди теряется
                        let _ = errors.try_send(ServerMessage::Error {
                            request_id: None,
                            message: format!("invalid message: {}", e),
                        });
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket {} read error: {}", session_id, e);
                    break;
                }
            }
        }
    });

    session.run(in_rx, out_tx).await;

    reader.abort();
    let _ = writer.await;

    info!("🔌 WebSocket {} disconnected", session_id);
}
