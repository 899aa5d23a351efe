//! Серверная сессия одного подключения.
//!
//! Транспорт-независима: WebSocket-контроллер и in-process `Connection`
//! гоняют одну и ту же сессию через пару каналов.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::UpdateReceiver;
use crate::error::SeatError;
use crate::models::{EventId, SeatUpdateEvent};
use crate::protocol::{ActionResult, ClientMessage, ServerMessage};
use crate::services::seats::SeatService;

/// Ёмкость исходящей очереди одной сессии.
pub const OUTBOUND_QUEUE: usize = 256;

pub struct Session {
    id: Uuid,
    service: Arc<SeatService>,
    joined: Option<(EventId, UpdateReceiver)>,
}

async fn next_update(
    joined: &mut Option<(EventId, UpdateReceiver)>,
) -> Result<Arc<SeatUpdateEvent>, RecvError> {
    match joined {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn error_reply(request_id: Option<u64>, err: &SeatError) -> ServerMessage {
    ServerMessage::Error {
        request_id,
        message: err.to_string(),
    }
}

impl Session {
    pub fn new(service: Arc<SeatService>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service,
            joined: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn joined_event(&self) -> Option<EventId> {
        self.joined.as_ref().map(|(id, _)| *id)
    }

    fn target_event(&self, event_id: Option<EventId>) -> Result<EventId, SeatError> {
        event_id
            .or_else(|| self.joined_event())
            .ok_or(SeatError::MissingEvent)
    }

    /// Обрабатывает одно сообщение клиента и возвращает прямые ответы.
    pub async fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        let request_id = msg.request_id();
        match self.dispatch(msg).await {
            Ok(replies) => replies,
            Err(err) => {
                debug!("Session {} request rejected: {}", self.id, err);
                vec![error_reply(request_id, &err)]
            }
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage) -> Result<Vec<ServerMessage>, SeatError> {
        match msg {
            ClientMessage::JoinEvent { event_id, .. } => {
                let (snapshot, receiver) = self.service.join(event_id).await?;
                // старая подписка закрывается вместе с приёмником
                self.joined = Some((event_id, receiver));
                info!("Session {} joined event {}", self.id, event_id);
                Ok(vec![ServerMessage::Snapshot(snapshot)])
            }
            ClientMessage::LeaveEvent { event_id } => {
                if event_id.is_none() || event_id == self.joined_event() {
                    self.joined = None;
                }
                Ok(Vec::new())
            }
            ClientMessage::ReserveSeats { event_id, seat_ids, user_id, request_id } => {
                let event_id = self.target_event(event_id)?;
                let outcome = self.service.reserve(event_id, &seat_ids, &user_id).await?;
                Ok(vec![ServerMessage::ActionResult(ActionResult::from_outcome(request_id, outcome))])
            }
            ClientMessage::ReleaseSeats { event_id, seat_ids, user_id, request_id } => {
                let event_id = self.target_event(event_id)?;
                let outcome = self.service.release(event_id, &seat_ids, &user_id).await?;
                Ok(vec![ServerMessage::ActionResult(ActionResult::from_outcome(request_id, outcome))])
            }
            ClientMessage::OccupySeats {
                event_id,
                seat_ids,
                user_id,
                transaction_id,
                request_id,
            } => {
                let event_id = self.target_event(event_id)?;
                let outcome = self
                    .service
                    .occupy_from_client(event_id, &seat_ids, &user_id, &transaction_id)
                    .await?;
                Ok(vec![ServerMessage::ActionResult(ActionResult::from_outcome(request_id, outcome))])
            }
        }
    }

    /// Гоняет сессию, пока клиент не закроет входящий канал или не пропадёт исходящий.
    ///
    /// Исходящая очередь ограничена. Если клиент не успевает её читать, дельты
    /// перестают ставиться в очередь, а когда место освобождается, клиент
    /// получает свежий снапшот. Так же обрабатывается отставание от канала
    /// события (`Lagged`).
    ///
    /// Резервы клиента при отключении не снимаются: их освобождает только TTL.
    pub async fn run(
        mut self,
        mut inbound: UnboundedReceiver<ClientMessage>,
        outbound: mpsc::Sender<ServerMessage>,
    ) {
        debug!("Session {} started", self.id);
        let mut needs_resync = false;
        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    let Some(msg) = msg else { break };
                    if matches!(msg, ClientMessage::JoinEvent { .. } | ClientMessage::LeaveEvent { .. }) {
                        needs_resync = false;
                    }
                    for reply in self.handle(msg).await {
                        if outbound.send(reply).await.is_err() {
                            debug!("Session {} outbound closed", self.id);
                            return;
                        }
                    }
                }
                update = next_update(&mut self.joined), if !needs_resync => {
                    match update {
                        Ok(event) => match outbound.try_send(ServerMessage::SeatUpdate((*event).clone())) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!("Session {} outbound queue full, dropping deltas until resync", self.id);
                                needs_resync = true;
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!("Session {} outbound closed", self.id);
                                return;
                            }
                        },
                        Err(RecvError::Lagged(missed)) => {
                            // Дельты потеряны: отдаём свежий снапшот вместо них
                            warn!("Session {} lagged by {} updates, resyncing", self.id, missed);
                            needs_resync = true;
                        }
                        Err(RecvError::Closed) => {
                            self.joined = None;
                        }
                    }
                }
                permit = outbound.reserve(), if needs_resync => {
                    let Ok(permit) = permit else {
                        debug!("Session {} outbound closed", self.id);
                        return;
                    };
                    needs_resync = false;
                    match self.resync() {
                        Ok(snapshot) => permit.send(snapshot),
                        Err(SeatError::MissingEvent) => {}
                        Err(e) => permit.send(error_reply(None, &e)),
                    }
                }
            }
        }
        info!("Session {} closed", self.id);
    }

    fn resync(&mut self) -> Result<ServerMessage, SeatError> {
        let event_id = self.joined_event().ok_or(SeatError::MissingEvent)?;
        let (snapshot, receiver) = self.service.arbiter().subscribe(event_id)?;
        self.joined = Some((event_id, receiver));
        Ok(ServerMessage::Snapshot(snapshot))
    }
}
