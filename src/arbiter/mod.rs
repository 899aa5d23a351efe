//! Арбитр резервирования мест.
//!
//! Ключевые свойства:
//! 1.  **Один замок на событие**: вся таблица мест события лежит под своим
//!     `Mutex`, поэтому read-modify-write двух запросов по одному месту никогда
//!     не перемежаются. Разные события обрабатываются параллельно.
//! 2.  **Конфликт это данные**: место в неподходящем состоянии попадает в
//!     `conflicts`, остальные места пакета при этом обрабатываются.
//! 3.  **Рассылка под замком**: дельта публикуется до отпускания замка, так что
//!     подписчики видят изменения одного места в порядке коммитов.

pub mod table;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use crate::broadcast::{EventChannel, UpdateReceiver};
use crate::clock::Clock;
use crate::error::SeatError;
use crate::models::{
    Availability, EventId, SeatId, SeatMap, SeatSnapshot, SeatUpdate, SeatUpdateEvent, SeatView,
    UserId,
};

pub use table::{ConflictReason, SeatTable};

pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeatAction {
    Reserve,
    Release,
    Occupy,
}

impl SeatAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatAction::Reserve => "reserve",
            SeatAction::Release => "release",
            SeatAction::Occupy => "occupy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatConflict {
    pub seat_id: SeatId,
    pub reason: ConflictReason,
}

/// Result of one batch intent.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub event_id: EventId,
    pub action: SeatAction,
    /// Seats that changed state, in request order.
    pub granted: Vec<SeatId>,
    pub conflicts: Vec<SeatConflict>,
    /// Release no-ops: seats not held by the caller.
    pub skipped: Vec<SeatId>,
    /// The delta that was broadcast, if anything changed.
    pub update: Option<SeatUpdateEvent>,
}

#[derive(Debug, Clone)]
pub struct ArbiterSettings {
    pub reservation_ttl: Duration,
    pub channel_capacity: usize,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
            channel_capacity: 1024,
        }
    }
}

struct EventRoom {
    table: SeatTable,
    channel: EventChannel,
}

enum Step {
    Changed(SeatUpdate),
    Conflict(ConflictReason),
    Skipped,
}

pub struct ReservationArbiter {
    rooms: RwLock<HashMap<EventId, Arc<Mutex<EventRoom>>>>,
    clock: Arc<dyn Clock>,
    settings: ArbiterSettings,
}

// Отравленный замок не повод терять таблицу: переходы атомарны по одному месту.
fn lock(room: &Mutex<EventRoom>) -> MutexGuard<'_, EventRoom> {
    room.lock().unwrap_or_else(|e| e.into_inner())
}

impl ReservationArbiter {
    pub fn new(clock: Arc<dyn Clock>, settings: ArbiterSettings) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            clock,
            settings,
        }
    }

    pub fn reservation_ttl(&self) -> Duration {
        self.settings.reservation_ttl
    }

    /// Регистрирует схему зала. Повторная регистрация того же события ничего не меняет.
    pub fn register(&self, map: &SeatMap) -> bool {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        if rooms.contains_key(&map.event_id) {
            return false;
        }
        let room = EventRoom {
            table: SeatTable::from_map(map),
            channel: EventChannel::new(map.event_id, self.settings.channel_capacity),
        };
        rooms.insert(map.event_id, Arc::new(Mutex::new(room)));
        info!("🎫 Seat map registered for event {} ({} seats)", map.event_id, map.capacity());
        true
    }

    pub fn is_registered(&self, event_id: EventId) -> bool {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&event_id)
    }

    pub fn events(&self) -> Vec<EventId> {
        let mut ids: Vec<EventId> = self
            .rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    fn room(&self, event_id: EventId) -> Result<Arc<Mutex<EventRoom>>, SeatError> {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_id)
            .cloned()
            .ok_or(SeatError::UnknownEvent(event_id))
    }

    pub fn reserve(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
        user: &UserId,
    ) -> Result<BatchOutcome, SeatError> {
        let ttl = self.settings.reservation_ttl;
        self.apply(event_id, seat_ids, SeatAction::Reserve, |table, seat_id, now| {
            let until = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
            match table.try_reserve(seat_id, user, until) {
                Ok(update) => Step::Changed(update),
                Err(reason) => Step::Conflict(reason),
            }
        })
    }

    pub fn release(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
        user: &UserId,
    ) -> Result<BatchOutcome, SeatError> {
        self.apply(event_id, seat_ids, SeatAction::Release, |table, seat_id, _| {
            match table.try_release(seat_id, user) {
                Some(update) => Step::Changed(update),
                None => Step::Skipped,
            }
        })
    }

    /// Переводит резервы пользователя в проданные под транзакцией `transaction_id`.
    pub fn occupy(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
        user: &UserId,
        transaction_id: &str,
    ) -> Result<BatchOutcome, SeatError> {
        let outcome = self.apply(event_id, seat_ids, SeatAction::Occupy, |table, seat_id, now| {
            match table.try_occupy(seat_id, user, now, transaction_id) {
                Ok(update) => Step::Changed(update),
                Err(reason) => Step::Conflict(reason),
            }
        })?;
        info!(
            target: "seat_audit",
            event_id,
            transaction_id,
            user = %user,
            occupied = outcome.granted.len(),
            conflicts = outcome.conflicts.len(),
            "occupy processed"
        );
        Ok(outcome)
    }

    fn apply<F>(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
        action: SeatAction,
        mut step: F,
    ) -> Result<BatchOutcome, SeatError>
    where
        F: FnMut(&mut SeatTable, &SeatId, DateTime<Utc>) -> Step,
    {
        if seat_ids.is_empty() {
            return Err(SeatError::EmptySeatList);
        }

        let mut seen = HashSet::with_capacity(seat_ids.len());
        let seat_ids: Vec<&SeatId> = seat_ids.iter().filter(|id| seen.insert(*id)).collect();

        let room = self.room(event_id)?;
        let mut room = lock(&room);

        let unknown: Vec<SeatId> = seat_ids
            .iter()
            .filter(|id| !room.table.contains(id))
            .map(|id| (*id).clone())
            .collect();
        if !unknown.is_empty() {
            return Err(SeatError::UnknownSeats {
                event_id,
                seats: unknown,
            });
        }

        let now = self.clock.now();
        let mut outcome = BatchOutcome {
            event_id,
            action,
            granted: Vec::new(),
            conflicts: Vec::new(),
            skipped: Vec::new(),
            update: None,
        };
        let mut updates = Vec::new();

        for seat_id in seat_ids {
            match step(&mut room.table, seat_id, now) {
                Step::Changed(update) => {
                    outcome.granted.push(seat_id.clone());
                    updates.push(update);
                }
                Step::Conflict(reason) => outcome.conflicts.push(SeatConflict {
                    seat_id: seat_id.clone(),
                    reason,
                }),
                Step::Skipped => outcome.skipped.push(seat_id.clone()),
            }
        }

        if !updates.is_empty() {
            let event = SeatUpdateEvent {
                event_id,
                updates,
                timestamp: now,
            };
            Self::commit(&room, action.as_str(), &event);
            outcome.update = Some(event);
        }

        debug!(
            "{} on event {}: {} granted, {} conflicts, {} skipped",
            action.as_str(),
            event_id,
            outcome.granted.len(),
            outcome.conflicts.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    // Аудит и рассылка; вызывается под замком события.
    fn commit(room: &EventRoom, cause: &str, event: &SeatUpdateEvent) {
        for update in &event.updates {
            info!(
                target: "seat_audit",
                event_id = event.event_id,
                seat_id = %update.seat_id,
                status = update.status.as_str(),
                user = update.user_id.as_ref().map(UserId::as_str).unwrap_or("-"),
                version = update.version,
                cause,
                "seat transition"
            );
        }
        let delivered = room.channel.publish(event.clone());
        debug!("Update for event {} queued to {} subscribers", event.event_id, delivered);
    }

    /// Снимает истёкшие резервы во всех событиях. Возвращает число освобождённых мест.
    pub fn sweep_expired(&self) -> usize {
        let rooms: Vec<Arc<Mutex<EventRoom>>> = self
            .rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut released = 0;
        for room in rooms {
            let mut room = lock(&room);
            let now = self.clock.now();
            let updates = room.table.expire(now);
            if updates.is_empty() {
                continue;
            }
            released += updates.len();
            let event = SeatUpdateEvent {
                event_id: room.table.event_id(),
                updates,
                timestamp: now,
            };
            Self::commit(&room, "expired", &event);
        }
        released
    }

    pub fn snapshot(&self, event_id: EventId) -> Result<SeatSnapshot, SeatError> {
        let room = self.room(event_id)?;
        let room = lock(&room);
        Ok(SeatSnapshot {
            event_id,
            seats: room.table.views(),
            timestamp: self.clock.now(),
        })
    }

    /// Подписка и снапшот под одним замком: ни одна дельта не попадёт между ними.
    pub fn subscribe(&self, event_id: EventId) -> Result<(SeatSnapshot, UpdateReceiver), SeatError> {
        let room = self.room(event_id)?;
        let room = lock(&room);
        let receiver = room.channel.subscribe();
        let snapshot = SeatSnapshot {
            event_id,
            seats: room.table.views(),
            timestamp: self.clock.now(),
        };
        Ok((snapshot, receiver))
    }

    /// Продано ли место пользователю в транзакции `transaction_id`.
    pub fn sold_under(
        &self,
        event_id: EventId,
        seat_id: &SeatId,
        user: &UserId,
        transaction_id: &str,
    ) -> Result<bool, SeatError> {
        let room = self.room(event_id)?;
        let room = lock(&room);
        Ok(room.table.sold_under(seat_id, user, transaction_id))
    }

    pub fn seat(&self, event_id: EventId, seat_id: &SeatId) -> Result<Option<SeatView>, SeatError> {
        let room = self.room(event_id)?;
        let view = lock(&room).table.view(seat_id);
        Ok(view)
    }

    pub fn availability(&self, event_id: EventId) -> Result<Availability, SeatError> {
        let room = self.room(event_id)?;
        let availability = lock(&room).table.availability();
        Ok(availability)
    }

    pub fn subscriber_count(&self, event_id: EventId) -> Result<usize, SeatError> {
        let room = self.room(event_id)?;
        let count = lock(&room).channel.subscriber_count();
        Ok(count)
    }
}
