use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::arbiter::ReservationArbiter;

/// Фоновая очистка истёкших резервов.
pub struct ReservationSweeper {
    arbiter: Arc<ReservationArbiter>,
    interval: Duration,
}

impl ReservationSweeper {
    pub fn new(arbiter: Arc<ReservationArbiter>, interval: Duration) -> Self {
        Self { arbiter, interval }
    }

    /// Один проход по всем событиям. Возвращает число освобождённых мест.
    pub fn run_once(&self) -> usize {
        let released = self.arbiter.sweep_expired();
        if released > 0 {
            info!("⏰ Released {} expired reservations", released);
        } else {
            debug!("⏰ No expired reservations");
        }
        released
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("⏰ Reservation sweeper started, every {:?}", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.run_once();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::ArbiterSettings;
    use crate::clock::ManualClock;
    use crate::models::{SeatId, UserId};
    use crate::store::memory::demo_map;

    #[tokio::test]
    async fn run_once_releases_due_reservations() {
        let clock = Arc::new(ManualClock::default());
        let arbiter = Arc::new(ReservationArbiter::new(clock.clone(), ArbiterSettings::default()));
        arbiter.register(&demo_map(1, 1, 3));
        let user = UserId::parse("u1").unwrap();
        arbiter.reserve(1, &[SeatId::from("A1"), SeatId::from("A2")], &user).unwrap();

        let sweeper = ReservationSweeper::new(arbiter.clone(), Duration::from_secs(30));
        assert_eq!(sweeper.run_once(), 0);

        clock.advance(chrono::Duration::minutes(16));
        assert_eq!(sweeper.run_once(), 2);
        assert_eq!(arbiter.availability(1).unwrap().available, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_ticks() {
        let clock = Arc::new(ManualClock::default());
        let arbiter = Arc::new(ReservationArbiter::new(clock.clone(), ArbiterSettings::default()));
        arbiter.register(&demo_map(1, 1, 1));
        arbiter
            .reserve(1, &[SeatId::from("A1")], &UserId::parse("u1").unwrap())
            .unwrap();
        clock.advance(chrono::Duration::hours(1));

        let handle = ReservationSweeper::new(arbiter.clone(), Duration::from_secs(30)).spawn();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(arbiter.availability(1).unwrap().reserved, 0);
        handle.abort();
    }
}
