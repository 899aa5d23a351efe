#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use eventu_seats::arbiter::{ArbiterSettings, ReservationArbiter};
use eventu_seats::client::MirrorEvent;
use eventu_seats::clock::ManualClock;
use eventu_seats::models::{SeatId, SeatMap};
use eventu_seats::services::SeatService;
use eventu_seats::store::{demo_map, InMemorySeatStore};

pub const EVENT: i64 = 7;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemorySeatStore>,
    pub service: Arc<SeatService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_maps([demo_map(EVENT, 3, 4)], false)
    }

    pub fn with_maps(maps: impl IntoIterator<Item = SeatMap>, allow_client_occupy: bool) -> Self {
        Self::with_settings(maps, allow_client_occupy, ArbiterSettings::default())
    }

    pub fn with_settings(
        maps: impl IntoIterator<Item = SeatMap>,
        allow_client_occupy: bool,
        settings: ArbiterSettings,
    ) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemorySeatStore::with_maps(maps));
        let arbiter = Arc::new(ReservationArbiter::new(clock.clone(), settings));
        let service = Arc::new(SeatService::new(arbiter, store.clone(), allow_client_occupy));
        Self { clock, store, service }
    }

    pub fn arbiter(&self) -> &Arc<ReservationArbiter> {
        self.service.arbiter()
    }
}

pub fn seat(id: &str) -> SeatId {
    SeatId::from(id)
}

pub fn seats(ids: &[&str]) -> Vec<SeatId> {
    ids.iter().map(|id| SeatId::from(*id)).collect()
}

/// Ждёт, пока в зеркале не появятся изменения по месту.
pub async fn wait_for_change(events: &mut broadcast::Receiver<MirrorEvent>, seat_id: &SeatId) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(MirrorEvent::SeatsChanged { seat_ids, .. }) if seat_ids.contains(seat_id) => {
                    return
                }
                Ok(_) => continue,
                Err(e) => panic!("mirror events closed: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no update for seat");
}
