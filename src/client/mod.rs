//! Клиентская часть: локальное зеркало схемы зала и клиент протокола.
//!
//! `SeatClient` держит одно `Connection`, пишет в `SeatMirror` только то,
//! что подтвердил сервер, и раздаёт изменения подписчикам `MirrorEvent`.

mod connection;
mod mirror;

pub use connection::Connection;
pub use mirror::{Applied, SeatMirror};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::arbiter::ConflictReason;
use crate::models::{EventId, SeatId, SeatStatus, SeatView, UserId};
use crate::protocol::{ActionResult, ClientMessage, ServerMessage};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MIRROR_EVENTS_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Not joined to any event")]
    NotJoined,

    #[error("Connection closed")]
    Disconnected,

    #[error("Request timed out")]
    Timeout,
}

/// Что поменялось в зеркале. Рассылается всем подписчикам клиента.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    Snapshot { event_id: EventId },
    SeatsChanged { event_id: EventId, seat_ids: Vec<SeatId> },
    ResyncRequested { event_id: EventId },
    Error { message: String },
    Disconnected,
}

enum Pending {
    Join {
        event_id: EventId,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Action(oneshot::Sender<Result<ActionResult, ClientError>>),
}

impl Pending {
    fn fail(self, err: ClientError) {
        match self {
            Pending::Join { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Pending::Action(reply) => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

struct Shared {
    mirror: Mutex<SeatMirror>,
    pending: Mutex<HashMap<u64, Pending>>,
    events: broadcast::Sender<MirrorEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn emit(&self, event: MirrorEvent) {
        // никто не слушает - не ошибка
        let _ = self.events.send(event);
    }

    fn fail_all(&self, make: impl Fn() -> ClientError) {
        let drained: Vec<Pending> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        for pending in drained {
            pending.fail(make());
        }
    }

    fn on_message(&self, msg: ServerMessage, outbound: &UnboundedSender<ClientMessage>) {
        match msg {
            ServerMessage::Snapshot(snapshot) => {
                let event_id = snapshot.event_id;
                lock(&self.mirror).apply_snapshot(&snapshot);

                let joined: Vec<Pending> = {
                    let mut pending = lock(&self.pending);
                    let ids: Vec<u64> = pending
                        .iter()
                        .filter(|(_, p)| matches!(p, Pending::Join { event_id: e, .. } if *e == event_id))
                        .map(|(id, _)| *id)
                        .collect();
                    ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
                };
                for pending in joined {
                    if let Pending::Join { reply, .. } = pending {
                        let _ = reply.send(Ok(()));
                    }
                }
                self.emit(MirrorEvent::Snapshot { event_id });
            }
            ServerMessage::SeatUpdate(update) => {
                let event_id = update.event_id;
                let (applied, was_stale) = {
                    let mut mirror = lock(&self.mirror);
                    let was_stale = mirror.is_stale();
                    (mirror.apply_update(&update), was_stale)
                };
                if !applied.changed.is_empty() {
                    self.emit(MirrorEvent::SeatsChanged {
                        event_id,
                        seat_ids: applied.changed,
                    });
                }
                if applied.gap && !was_stale {
                    warn!("Seat mirror for event {} missed updates, resyncing", event_id);
                    self.emit(MirrorEvent::ResyncRequested { event_id });
                    let _ = outbound.send(ClientMessage::JoinEvent {
                        event_id,
                        request_id: None,
                    });
                }
            }
            ServerMessage::ActionResult(result) => {
                let Some(request_id) = result.request_id else {
                    return;
                };
                match lock(&self.pending).remove(&request_id) {
                    Some(Pending::Action(reply)) => {
                        let _ = reply.send(Ok(result));
                    }
                    Some(other) => other.fail(ClientError::Rejected("unexpected reply".to_string())),
                    None => debug!("Late action result {}", request_id),
                }
            }
            ServerMessage::Error { request_id, message } => {
                let waiting = request_id.and_then(|id| lock(&self.pending).remove(&id));
                match waiting {
                    Some(pending) => pending.fail(ClientError::Rejected(message)),
                    None => {
                        warn!("Server error: {}", message);
                        self.emit(MirrorEvent::Error { message });
                    }
                }
            }
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut inbound: Receiver<ServerMessage>,
    outbound: UnboundedSender<ClientMessage>,
) {
    while let Some(msg) = inbound.recv().await {
        shared.on_message(msg, &outbound);
    }
    info!("Seat client connection closed");
    lock(&shared.mirror).mark_stale();
    shared.fail_all(|| ClientError::Disconnected);
    shared.emit(MirrorEvent::Disconnected);
}

/// Клиент координатора мест для одного пользователя.
pub struct SeatClient {
    shared: Arc<Shared>,
    outbound: UnboundedSender<ClientMessage>,
    reader: JoinHandle<()>,
    next_request: AtomicU64,
    timeout: Duration,
}

impl SeatClient {
    /// Must be called inside a tokio runtime: spawns the reader task.
    pub fn connect(connection: Connection, me: UserId) -> Self {
        let (events, _) = broadcast::channel(MIRROR_EVENTS_CAPACITY);
        let shared = Arc::new(Shared {
            mirror: Mutex::new(SeatMirror::new(me)),
            pending: Mutex::new(HashMap::new()),
            events,
        });
        let (outbound, inbound) = connection.into_parts();
        let reader = tokio::spawn(read_loop(shared.clone(), inbound, outbound.clone()));

        Self {
            shared,
            outbound,
            reader,
            next_request: AtomicU64::new(1),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn me(&self) -> UserId {
        lock(&self.shared.mirror).me().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.shared.events.subscribe()
    }

    fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    async fn wait<T>(
        &self,
        request_id: u64,
        reply: oneshot::Receiver<Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                lock(&self.shared.pending).remove(&request_id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Подписывается на событие и ждёт первый снапшот.
    pub async fn join(&self, event_id: EventId) -> Result<(), ClientError> {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(request_id, Pending::Join { event_id, reply: tx });

        let msg = ClientMessage::JoinEvent {
            event_id,
            request_id: Some(request_id),
        };
        if self.outbound.send(msg).is_err() {
            lock(&self.shared.pending).remove(&request_id);
            return Err(ClientError::Disconnected);
        }
        self.wait(request_id, rx).await
    }

    pub fn leave(&self) -> Result<(), ClientError> {
        let event_id = {
            let mut mirror = lock(&self.shared.mirror);
            let event_id = mirror.event_id();
            mirror.reset();
            event_id
        };
        self.outbound
            .send(ClientMessage::LeaveEvent { event_id })
            .map_err(|_| ClientError::Disconnected)
    }

    /// Re-fetches the snapshot for the joined event.
    pub async fn resync(&self) -> Result<(), ClientError> {
        let event_id = self.event_id().ok_or(ClientError::NotJoined)?;
        lock(&self.shared.mirror).mark_stale();
        self.join(event_id).await
    }

    /// Переключает клиента на новое соединение.
    ///
    /// Зеркало и выбор сбрасываются, ожидающие запросы падают с
    /// `Disconnected`, затем клиент заново входит в прежнее событие.
    pub async fn reconnect(&mut self, connection: Connection) -> Result<(), ClientError> {
        self.reader.abort();
        let previous = {
            let mut mirror = lock(&self.shared.mirror);
            let event_id = mirror.event_id();
            mirror.reset();
            event_id
        };
        self.shared.fail_all(|| ClientError::Disconnected);

        let (outbound, inbound) = connection.into_parts();
        self.reader = tokio::spawn(read_loop(self.shared.clone(), inbound, outbound.clone()));
        self.outbound = outbound;
        info!("🔌 Seat client reconnected");

        match previous {
            Some(event_id) => self.join(event_id).await,
            None => Ok(()),
        }
    }

    async fn send_intent(
        &self,
        build: impl FnOnce(EventId, u64) -> ClientMessage,
    ) -> Result<ActionResult, ClientError> {
        let event_id = self.event_id().ok_or(ClientError::NotJoined)?;
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(request_id, Pending::Action(tx));

        if self.outbound.send(build(event_id, request_id)).is_err() {
            lock(&self.shared.pending).remove(&request_id);
            return Err(ClientError::Disconnected);
        }
        let result = self.wait(request_id, rx).await?;
        self.refresh_if_contradicted(&result);
        Ok(result)
    }

    // Зеркало отстало, только если арбитр видит чужой резерв или продажу там,
    // где зеркало показывает свободное место. NotHeld/Expired при свободном
    // месте с зеркалом согласуются.
    fn refresh_if_contradicted(&self, result: &ActionResult) {
        let contradicted = {
            let mut mirror = lock(&self.shared.mirror);
            let contradicted = !mirror.is_stale()
                && mirror.event_id() == Some(result.event_id)
                && result
                    .conflicts
                    .iter()
                    .any(|c| {
                        matches!(c.reason, ConflictReason::Reserved | ConflictReason::Occupied)
                            && mirror.status(&c.seat_id) == Some(SeatStatus::Available)
                    });
            if contradicted {
                mirror.mark_stale();
            }
            contradicted
        };
        if !contradicted {
            return;
        }

        debug!("Arbiter contradicted the mirror for event {}, resyncing", result.event_id);
        self.shared.emit(MirrorEvent::ResyncRequested {
            event_id: result.event_id,
        });
        let _ = self.outbound.send(ClientMessage::JoinEvent {
            event_id: result.event_id,
            request_id: None,
        });
    }

    /// Отправляет намерение зарезервировать места.
    ///
    /// Результат говорит, что выдал арбитр; зеркало поменяется только
    /// после рассылки `seatUpdate`.
    pub async fn reserve(&self, seat_ids: &[SeatId]) -> Result<ActionResult, ClientError> {
        let user_id = self.me().to_string();
        let seat_ids = seat_ids.to_vec();
        self.send_intent(move |event_id, request_id| ClientMessage::ReserveSeats {
            event_id: Some(event_id),
            seat_ids,
            user_id,
            request_id: Some(request_id),
        })
        .await
    }

    pub async fn reserve_selected(&self) -> Result<ActionResult, ClientError> {
        let selected = self.selected();
        self.reserve(&selected).await
    }

    pub async fn release(&self, seat_ids: &[SeatId]) -> Result<ActionResult, ClientError> {
        let user_id = self.me().to_string();
        let seat_ids = seat_ids.to_vec();
        self.send_intent(move |event_id, request_id| ClientMessage::ReleaseSeats {
            event_id: Some(event_id),
            seat_ids,
            user_id,
            request_id: Some(request_id),
        })
        .await
    }

    /// Rejected unless the server allows client-driven occupation.
    pub async fn occupy(
        &self,
        seat_ids: &[SeatId],
        transaction_id: &str,
    ) -> Result<ActionResult, ClientError> {
        let user_id = self.me().to_string();
        let seat_ids = seat_ids.to_vec();
        let transaction_id = transaction_id.to_string();
        self.send_intent(move |event_id, request_id| ClientMessage::OccupySeats {
            event_id: Some(event_id),
            seat_ids,
            user_id,
            transaction_id,
            request_id: Some(request_id),
        })
        .await
    }

    pub fn select(&self, seat_id: &SeatId) -> bool {
        lock(&self.shared.mirror).select(seat_id)
    }

    pub fn deselect(&self, seat_id: &SeatId) -> bool {
        lock(&self.shared.mirror).deselect(seat_id)
    }

    pub fn selected(&self) -> Vec<SeatId> {
        lock(&self.shared.mirror).selected()
    }

    pub fn event_id(&self) -> Option<EventId> {
        lock(&self.shared.mirror).event_id()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.shared.mirror).is_ready()
    }

    pub fn status(&self, seat_id: &SeatId) -> Option<SeatStatus> {
        lock(&self.shared.mirror).status(seat_id)
    }

    pub fn view(&self, seat_id: &SeatId) -> Option<SeatView> {
        lock(&self.shared.mirror).view(seat_id).cloned()
    }

    pub fn views(&self) -> Vec<SeatView> {
        lock(&self.shared.mirror).views()
    }

    pub fn held_by_me(&self) -> Vec<SeatId> {
        lock(&self.shared.mirror).held_by_me()
    }

    /// Копия зеркала для отрисовки.
    pub fn mirror(&self) -> SeatMirror {
        lock(&self.shared.mirror).clone()
    }
}

impl Drop for SeatClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
