use std::collections::{BTreeSet, HashMap};

use crate::models::{EventId, SeatId, SeatSnapshot, SeatStatus, SeatUpdateEvent, SeatView, UserId};

/// What applying one delta did to the mirror.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Applied {
    pub changed: Vec<SeatId>,
    /// A per-seat version jumped or an unknown seat showed up: deltas were missed.
    pub gap: bool,
}

/// Локальное зеркало схемы зала в браузере.
///
/// Различает «я хочу это место» (`selected`, только локально) и «место за
/// мной» (`reserved` с моим holder, только после рассылки сервера).
#[derive(Debug, Clone)]
pub struct SeatMirror {
    me: UserId,
    event_id: Option<EventId>,
    seats: HashMap<SeatId, SeatView>,
    order: Vec<SeatId>,
    selected: BTreeSet<SeatId>,
    stale: bool,
}

impl SeatMirror {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            event_id: None,
            seats: HashMap::new(),
            order: Vec::new(),
            selected: BTreeSet::new(),
            stale: false,
        }
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn event_id(&self) -> Option<EventId> {
        self.event_id
    }

    /// Нет снапшота: зеркало ещё не готово к отрисовке.
    pub fn is_ready(&self) -> bool {
        self.event_id.is_some() && !self.stale
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Discards everything, including the local selection.
    pub fn reset(&mut self) {
        self.event_id = None;
        self.seats.clear();
        self.order.clear();
        self.selected.clear();
        self.stale = false;
    }

    pub fn apply_snapshot(&mut self, snapshot: &SeatSnapshot) {
        if self.event_id != Some(snapshot.event_id) {
            self.selected.clear();
        }
        self.event_id = Some(snapshot.event_id);
        self.seats.clear();
        self.order.clear();
        for view in &snapshot.seats {
            self.order.push(view.seat_id.clone());
            self.seats.insert(view.seat_id.clone(), view.clone());
        }
        // выбор переживает снапшот только для мест, которые всё ещё свободны
        let seats = &self.seats;
        self.selected.retain(|id| {
            seats
                .get(id)
                .is_some_and(|v| v.status == SeatStatus::Available)
        });
        self.stale = false;
    }

    pub fn apply_update(&mut self, event: &SeatUpdateEvent) -> Applied {
        let mut applied = Applied::default();
        if self.event_id != Some(event.event_id) {
            return applied;
        }

        for update in &event.updates {
            let Some(view) = self.seats.get_mut(&update.seat_id) else {
                applied.gap = true;
                continue;
            };
            // дубль при at-least-once доставке или дельта старше снапшота
            if update.version <= view.version {
                continue;
            }
            if update.version > view.version + 1 {
                applied.gap = true;
            }
            view.status = update.status;
            view.holder = update.user_id.clone();
            view.reserved_until = update.reserved_until;
            view.version = update.version;

            if update.status != SeatStatus::Available {
                self.selected.remove(&update.seat_id);
            }
            applied.changed.push(update.seat_id.clone());
        }

        if applied.gap {
            self.stale = true;
        }
        applied
    }

    /// Локальный выбор места. Разрешён только для мест, свободных по зеркалу.
    pub fn select(&mut self, seat_id: &SeatId) -> bool {
        match self.seats.get(seat_id) {
            Some(view) if view.status == SeatStatus::Available => {
                self.selected.insert(seat_id.clone())
            }
            _ => false,
        }
    }

    pub fn deselect(&mut self, seat_id: &SeatId) -> bool {
        self.selected.remove(seat_id)
    }

    pub fn selected(&self) -> Vec<SeatId> {
        self.selected.iter().cloned().collect()
    }

    pub fn is_selected(&self, seat_id: &SeatId) -> bool {
        self.selected.contains(seat_id)
    }

    /// Server-confirmed status.
    pub fn status(&self, seat_id: &SeatId) -> Option<SeatStatus> {
        self.seats.get(seat_id).map(|v| v.status)
    }

    pub fn view(&self, seat_id: &SeatId) -> Option<&SeatView> {
        self.seats.get(seat_id)
    }

    pub fn views(&self) -> Vec<SeatView> {
        self.order
            .iter()
            .filter_map(|id| self.seats.get(id).cloned())
            .collect()
    }

    /// Места, которые сервер подтвердил за этим пользователем.
    pub fn held_by_me(&self) -> Vec<SeatId> {
        self.order
            .iter()
            .filter(|id| {
                self.seats.get(*id).is_some_and(|v| {
                    v.status == SeatStatus::Reserved && v.holder.as_ref() == Some(&self.me)
                })
            })
            .cloned()
            .collect()
    }
}
