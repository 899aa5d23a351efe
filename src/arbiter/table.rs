use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{
    Availability, EventId, SeatId, SeatMap, SeatStatus, SeatUpdate, SeatView, UserId,
};

/// Причина, по которой конкретное место не перешло в нужное состояние.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictReason {
    /// Место уже кем-то зарезервировано (в том числе самим же пользователем).
    Reserved,
    /// Место продано.
    Occupied,
    /// Место не зарезервировано этим пользователем.
    NotHeld,
    /// Резерв пользователя истёк и больше не действует.
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
struct SeatState {
    status: SeatStatus,
    holder: Option<UserId>,
    reserved_until: Option<DateTime<Utc>>,
    /// Транзакция продажи; есть только у occupied.
    transaction: Option<String>,
    version: u64,
}

impl SeatState {
    fn available() -> Self {
        Self {
            status: SeatStatus::Available,
            holder: None,
            reserved_until: None,
            transaction: None,
            version: 0,
        }
    }

    // holder есть только у reserved/occupied, срок только у reserved
    fn is_consistent(&self) -> bool {
        let holder_ok = self.holder.is_some() == (self.status != SeatStatus::Available);
        let until_ok = self.reserved_until.is_some() == (self.status == SeatStatus::Reserved);
        holder_ok && until_ok
    }

    fn set(&mut self, status: SeatStatus, holder: Option<UserId>, until: Option<DateTime<Utc>>) {
        self.status = status;
        self.holder = holder;
        self.reserved_until = until;
        if status != SeatStatus::Occupied {
            self.transaction = None;
        }
        self.version += 1;
        debug_assert!(self.is_consistent());
    }

    fn to_update(&self, seat_id: &SeatId) -> SeatUpdate {
        SeatUpdate {
            seat_id: seat_id.clone(),
            status: self.status,
            user_id: self.holder.clone(),
            reserved_until: self.reserved_until,
            version: self.version,
        }
    }

    fn to_view(&self, seat_id: &SeatId) -> SeatView {
        SeatView {
            seat_id: seat_id.clone(),
            status: self.status,
            holder: self.holder.clone(),
            reserved_until: self.reserved_until,
            version: self.version,
        }
    }
}

/// Authoritative mutable state of every seat of one event.
///
/// Not synchronized on its own: the arbiter keeps one table per event behind
/// a mutex and is the only code that mutates it.
#[derive(Debug, Clone)]
pub struct SeatTable {
    event_id: EventId,
    seats: HashMap<SeatId, SeatState>,
    order: Vec<SeatId>,
}

impl SeatTable {
    pub fn from_map(map: &SeatMap) -> Self {
        let mut seats = HashMap::with_capacity(map.seats.len());
        let mut order = Vec::with_capacity(map.seats.len());
        for seat in &map.seats {
            if seats.insert(seat.seat_id.clone(), SeatState::available()).is_none() {
                order.push(seat.seat_id.clone());
            }
        }

        for sold in &map.sold {
            if let Some(state) = seats.get_mut(&sold.seat_id) {
                state.status = SeatStatus::Occupied;
                state.holder = Some(sold.holder.clone());
                state.transaction = sold.transaction_id.clone();
            }
        }

        Self {
            event_id: map.event_id,
            seats,
            order,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, seat_id: &SeatId) -> bool {
        self.seats.contains_key(seat_id)
    }

    pub fn status(&self, seat_id: &SeatId) -> Option<SeatStatus> {
        self.seats.get(seat_id).map(|s| s.status)
    }

    pub fn try_reserve(
        &mut self,
        seat_id: &SeatId,
        user: &UserId,
        until: DateTime<Utc>,
    ) -> Result<SeatUpdate, ConflictReason> {
        let state = self.seats.get_mut(seat_id).ok_or(ConflictReason::NotHeld)?;
        match state.status {
            SeatStatus::Available => {
                state.set(SeatStatus::Reserved, Some(user.clone()), Some(until));
                Ok(state.to_update(seat_id))
            }
            SeatStatus::Reserved => Err(ConflictReason::Reserved),
            SeatStatus::Occupied => Err(ConflictReason::Occupied),
        }
    }

    /// `None` when the seat is not reserved by `user`; that is a no-op, not a conflict.
    pub fn try_release(&mut self, seat_id: &SeatId, user: &UserId) -> Option<SeatUpdate> {
        let state = self.seats.get_mut(seat_id)?;
        if state.status != SeatStatus::Reserved || state.holder.as_ref() != Some(user) {
            return None;
        }
        state.set(SeatStatus::Available, None, None);
        Some(state.to_update(seat_id))
    }

    pub fn try_occupy(
        &mut self,
        seat_id: &SeatId,
        user: &UserId,
        now: DateTime<Utc>,
        transaction_id: &str,
    ) -> Result<SeatUpdate, ConflictReason> {
        let state = self.seats.get_mut(seat_id).ok_or(ConflictReason::NotHeld)?;
        match state.status {
            SeatStatus::Reserved if state.holder.as_ref() == Some(user) => {
                if state.reserved_until.is_some_and(|until| until <= now) {
                    return Err(ConflictReason::Expired);
                }
                state.set(SeatStatus::Occupied, Some(user.clone()), None);
                state.transaction = Some(transaction_id.to_string());
                Ok(state.to_update(seat_id))
            }
            SeatStatus::Occupied => Err(ConflictReason::Occupied),
            _ => Err(ConflictReason::NotHeld),
        }
    }

    /// Продано ли место этому пользователю именно в этой транзакции.
    pub fn sold_under(&self, seat_id: &SeatId, user: &UserId, transaction_id: &str) -> bool {
        self.seats.get(seat_id).is_some_and(|s| {
            s.status == SeatStatus::Occupied
                && s.holder.as_ref() == Some(user)
                && s.transaction.as_deref() == Some(transaction_id)
        })
    }

    /// Снимает все резервы, срок которых наступил к `now`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<SeatUpdate> {
        let mut released = Vec::new();
        for seat_id in &self.order {
            if let Some(state) = self.seats.get_mut(seat_id) {
                let due = state.status == SeatStatus::Reserved
                    && state.reserved_until.is_some_and(|until| until <= now);
                if due {
                    state.set(SeatStatus::Available, None, None);
                    released.push(state.to_update(seat_id));
                }
            }
        }
        released
    }

    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.seats.values().filter_map(|s| s.reserved_until).min()
    }

    pub fn view(&self, seat_id: &SeatId) -> Option<SeatView> {
        self.seats.get(seat_id).map(|s| s.to_view(seat_id))
    }

    /// Seats in layout order.
    pub fn views(&self) -> Vec<SeatView> {
        self.order
            .iter()
            .filter_map(|id| self.seats.get(id).map(|s| s.to_view(id)))
            .collect()
    }

    pub fn availability(&self) -> Availability {
        let mut counts = Availability {
            event_id: self.event_id,
            ..Availability::default()
        };
        for state in self.seats.values() {
            match state.status {
                SeatStatus::Available => counts.available += 1,
                SeatStatus::Reserved => counts.reserved += 1,
                SeatStatus::Occupied => counts.occupied += 1,
            }
        }
        counts
    }
}
