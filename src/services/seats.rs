//! Фасад координатора: загрузка схем залов, валидация намерений, продажи.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::arbiter::{BatchOutcome, ConflictReason, ReservationArbiter};
use crate::broadcast::UpdateReceiver;
use crate::error::SeatError;
use crate::models::{Availability, EventId, SeatId, SeatMap, SeatSnapshot, UserId};
use crate::store::{SaleRecord, SeatStore};

/// "Sale confirmed" signal from the payment subsystem.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleConfirmation {
    pub event_id: EventId,
    pub seat_ids: Vec<SeatId>,
    pub user_id: String,
    pub transaction_id: String,
}

pub struct SeatService {
    arbiter: Arc<ReservationArbiter>,
    store: Arc<dyn SeatStore>,
    // Ячейка на событие: схема читается из хранилища один раз, разные события грузятся параллельно.
    layouts: RwLock<HashMap<EventId, Arc<OnceCell<Arc<SeatMap>>>>>,
    allow_client_occupy: bool,
}

fn parse_user(raw: &str) -> Result<UserId, SeatError> {
    UserId::parse(raw).map_err(SeatError::InvalidUser)
}

impl SeatService {
    pub fn new(
        arbiter: Arc<ReservationArbiter>,
        store: Arc<dyn SeatStore>,
        allow_client_occupy: bool,
    ) -> Self {
        Self {
            arbiter,
            store,
            layouts: RwLock::new(HashMap::new()),
            allow_client_occupy,
        }
    }

    pub fn arbiter(&self) -> &Arc<ReservationArbiter> {
        &self.arbiter
    }

    pub fn allows_client_occupy(&self) -> bool {
        self.allow_client_occupy
    }

    fn layout_cell(&self, event_id: EventId) -> Arc<OnceCell<Arc<SeatMap>>> {
        if let Some(cell) = self.layouts.read().unwrap_or_else(|e| e.into_inner()).get(&event_id) {
            return cell.clone();
        }
        self.layouts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_id)
            .or_default()
            .clone()
    }

    /// Схема зала события; при первом обращении читается из хранилища и
    /// регистрируется в арбитре.
    pub async fn layout(&self, event_id: EventId) -> Result<Arc<SeatMap>, SeatError> {
        let cell = self.layout_cell(event_id);
        let loaded = cell
            .get_or_try_init(|| async {
                let map = self.store.load_seat_map(event_id).await?;
                self.arbiter.register(&map);
                Ok::<_, SeatError>(Arc::new(map))
            })
            .await;

        match loaded {
            Ok(map) => Ok(map.clone()),
            Err(e) => {
                // пустые ячейки под несуществующие события не копим
                let mut layouts = self.layouts.write().unwrap_or_else(|e| e.into_inner());
                if layouts.get(&event_id).is_some_and(|c| Arc::ptr_eq(c, &cell) && !c.initialized()) {
                    layouts.remove(&event_id);
                }
                Err(e)
            }
        }
    }

    /// Registers an already loaded map, bypassing the store.
    pub fn preload(&self, map: SeatMap) {
        self.arbiter.register(&map);
        let _ = self.layout_cell(map.event_id).set(Arc::new(map));
    }

    pub async fn join(&self, event_id: EventId) -> Result<(SeatSnapshot, UpdateReceiver), SeatError> {
        self.layout(event_id).await?;
        self.arbiter.subscribe(event_id)
    }

    pub async fn snapshot(&self, event_id: EventId) -> Result<SeatSnapshot, SeatError> {
        self.layout(event_id).await?;
        self.arbiter.snapshot(event_id)
    }

    pub async fn availability(&self, event_id: EventId) -> Result<Availability, SeatError> {
        self.layout(event_id).await?;
        self.arbiter.availability(event_id)
    }

    pub async fn reserve(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
        user_id: &str,
    ) -> Result<BatchOutcome, SeatError> {
        let user = parse_user(user_id)?;
        self.layout(event_id).await?;
        self.arbiter.reserve(event_id, seat_ids, &user)
    }

    pub async fn release(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
        user_id: &str,
    ) -> Result<BatchOutcome, SeatError> {
        let user = parse_user(user_id)?;
        self.layout(event_id).await?;
        self.arbiter.release(event_id, seat_ids, &user)
    }

    /// Occupy requested over a client socket; off unless configured.
    pub async fn occupy_from_client(
        &self,
        event_id: EventId,
        seat_ids: &[SeatId],
        user_id: &str,
        transaction_id: &str,
    ) -> Result<BatchOutcome, SeatError> {
        if !self.allow_client_occupy {
            return Err(SeatError::OccupyNotAllowed);
        }
        self.confirm_sale(SaleConfirmation {
            event_id,
            seat_ids: seat_ids.to_vec(),
            user_id: user_id.to_string(),
            transaction_id: transaction_id.to_string(),
        })
        .await
    }

    /// Подтверждение продажи: occupy в арбитре и запись продажи в хранилище.
    ///
    /// Арбитр коммитит переход сразу; ошибка записи в хранилище возвращается
    /// вызывающему, чтобы платёжная подсистема повторила подтверждение.
    /// Повтор идемпотентен: места, уже проданные этому же пользователю в этой
    /// же транзакции, записываются в хранилище ещё раз. Продажа того же места
    /// под другой транзакцией остаётся конфликтом.
    pub async fn confirm_sale(&self, sale: SaleConfirmation) -> Result<BatchOutcome, SeatError> {
        let user = parse_user(&sale.user_id)?;
        let transaction_id = sale.transaction_id.trim();
        if transaction_id.is_empty() {
            return Err(SeatError::EmptyTransaction);
        }
        self.layout(sale.event_id).await?;

        let outcome = self
            .arbiter
            .occupy(sale.event_id, &sale.seat_ids, &user, transaction_id)?;

        let mut sold = outcome.granted.clone();
        for conflict in &outcome.conflicts {
            if conflict.reason == ConflictReason::Occupied
                && self
                    .arbiter
                    .sold_under(sale.event_id, &conflict.seat_id, &user, transaction_id)?
            {
                sold.push(conflict.seat_id.clone());
            }
        }

        if sold.is_empty() {
            return Ok(outcome);
        }

        let record = SaleRecord {
            event_id: sale.event_id,
            seat_ids: sold,
            holder: user,
            transaction_id: transaction_id.to_string(),
        };
        if let Err(e) = self.store.record_sale(&record).await {
            error!(
                "💳 Sale {} committed in memory but not persisted: {}",
                record.transaction_id, e
            );
            return Err(e.into());
        }

        info!(
            "💳 Sale {} confirmed for event {}: {} seats",
            record.transaction_id,
            record.event_id,
            record.seat_ids.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::ArbiterSettings;
    use crate::clock::SystemClock;
    use crate::store::memory::{demo_map, InMemorySeatStore};

    fn service(allow_client_occupy: bool) -> (Arc<InMemorySeatStore>, SeatService) {
        let store = Arc::new(InMemorySeatStore::with_maps([demo_map(1, 2, 5)]));
        let arbiter = Arc::new(ReservationArbiter::new(
            Arc::new(SystemClock),
            ArbiterSettings::default(),
        ));
        let service = SeatService::new(arbiter, store.clone(), allow_client_occupy);
        (store, service)
    }

    fn ids(raw: &[&str]) -> Vec<SeatId> {
        raw.iter().map(|s| SeatId::from(*s)).collect()
    }

    #[tokio::test]
    async fn layout_is_loaded_on_first_use() {
        let (_, service) = service(false);
        assert!(!service.arbiter().is_registered(1));
        let snapshot = service.snapshot(1).await.unwrap();
        assert_eq!(snapshot.seats.len(), 10);
        assert!(service.arbiter().is_registered(1));
    }

    /// Хранилище, которое держит загрузку события 1, пока тест не откроет шлюз.
    struct GatedStore {
        inner: InMemorySeatStore,
        gate: tokio::sync::Semaphore,
        loads: std::sync::Mutex<HashMap<EventId, usize>>,
    }

    #[async_trait::async_trait]
    impl SeatStore for GatedStore {
        async fn load_seat_map(&self, event_id: EventId) -> Result<SeatMap, crate::error::StoreError> {
            *self.loads.lock().unwrap().entry(event_id).or_default() += 1;
            if event_id == 1 {
                let _permit = self.gate.acquire().await.unwrap();
            }
            self.inner.load_seat_map(event_id).await
        }

        async fn record_sale(&self, sale: &SaleRecord) -> Result<(), crate::error::StoreError> {
            self.inner.record_sale(sale).await
        }
    }

    #[tokio::test]
    async fn events_load_independently_and_once() {
        let store = Arc::new(GatedStore {
            inner: InMemorySeatStore::with_maps([demo_map(1, 1, 2), demo_map(2, 1, 2)]),
            gate: tokio::sync::Semaphore::new(0),
            loads: std::sync::Mutex::new(HashMap::new()),
        });
        let arbiter = Arc::new(ReservationArbiter::new(
            Arc::new(SystemClock),
            ArbiterSettings::default(),
        ));
        let service = Arc::new(SeatService::new(arbiter, store.clone(), false));

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.layout(1).await.map(|m| m.capacity()) }
        });
        let second = tokio::spawn({
            let service = service.clone();
            async move { service.layout(1).await.map(|m| m.capacity()) }
        });
        while store.loads.lock().unwrap().get(&1).is_none() {
            tokio::task::yield_now().await;
        }

        let other = tokio::time::timeout(std::time::Duration::from_secs(1), service.layout(2))
            .await
            .expect("event 2 waited for event 1");
        assert_eq!(other.unwrap().capacity(), 2);

        store.gate.add_permits(2);
        assert_eq!(first.await.unwrap().unwrap(), 2);
        assert_eq!(second.await.unwrap().unwrap(), 2);
        assert_eq!(store.loads.lock().unwrap()[&1], 1);
        assert!(service.arbiter().is_registered(1));
    }

    #[tokio::test]
    async fn unknown_event_and_bad_user_are_rejected() {
        let (_, service) = service(false);
        assert!(matches!(service.snapshot(42).await, Err(SeatError::UnknownEvent(42))));
        assert!(matches!(
            service.reserve(1, &ids(&["A1"]), " ").await,
            Err(SeatError::InvalidUser(_))
        ));
    }

    #[tokio::test]
    async fn sale_confirmation_occupies_and_records() {
        let (store, service) = service(false);
        service.reserve(1, &ids(&["A1", "A2"]), "u1").await.unwrap();

        let sale = SaleConfirmation {
            event_id: 1,
            seat_ids: ids(&["A1", "A2"]),
            user_id: "u1".to_string(),
            transaction_id: "tx-77".to_string(),
        };
        let outcome = service.confirm_sale(sale.clone()).await.unwrap();
        assert_eq!(outcome.granted, ids(&["A1", "A2"]));

        // повтор того же подтверждения
        let retry = service.confirm_sale(sale).await.unwrap();
        assert!(retry.granted.is_empty());
        assert_eq!(retry.conflicts.len(), 2);

        let sales = store.sales();
        assert_eq!(sales.len(), 2);
        assert_eq!(sales[1].seat_ids, ids(&["A1", "A2"]));
        assert_eq!(sales[0].transaction_id, "tx-77");
    }

    #[tokio::test]
    async fn second_transaction_for_sold_seats_is_a_conflict() {
        let (store, service) = service(false);
        service.reserve(1, &ids(&["A1"]), "u1").await.unwrap();

        let confirm = |tx: &str| SaleConfirmation {
            event_id: 1,
            seat_ids: ids(&["A1"]),
            user_id: "u1".to_string(),
            transaction_id: tx.to_string(),
        };
        service.confirm_sale(confirm("tx-1")).await.unwrap();

        let other = service.confirm_sale(confirm("tx-2")).await.unwrap();
        assert!(other.granted.is_empty());
        assert_eq!(other.conflicts[0].reason, ConflictReason::Occupied);

        let sales = store.sales();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].transaction_id, "tx-1");
    }

    #[tokio::test]
    async fn sale_for_someone_elses_hold_records_nothing() {
        let (store, service) = service(false);
        service.reserve(1, &ids(&["A1"]), "u1").await.unwrap();
        let outcome = service
            .confirm_sale(SaleConfirmation {
                event_id: 1,
                seat_ids: ids(&["A1"]),
                user_id: "u2".to_string(),
                transaction_id: "tx".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.conflicts[0].reason, ConflictReason::NotHeld);
        assert!(store.sales().is_empty());
    }

    #[tokio::test]
    async fn client_occupy_is_gated() {
        let (_, service) = service(false);
        service.reserve(1, &ids(&["A1"]), "u1").await.unwrap();
        assert!(matches!(
            service.occupy_from_client(1, &ids(&["A1"]), "u1", "tx").await,
            Err(SeatError::OccupyNotAllowed)
        ));

        let (_, open) = self::service(true);
        open.reserve(1, &ids(&["A1"]), "u1").await.unwrap();
        let outcome = open.occupy_from_client(1, &ids(&["A1"]), "u1", "tx").await.unwrap();
        assert_eq!(outcome.granted, ids(&["A1"]));
    }

    #[tokio::test]
    async fn empty_transaction_is_invalid() {
        let (_, service) = service(false);
        let err = service
            .confirm_sale(SaleConfirmation {
                event_id: 1,
                seat_ids: ids(&["A1"]),
                user_id: "u1".to_string(),
                transaction_id: "  ".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SeatError::EmptyTransaction));
    }
}
