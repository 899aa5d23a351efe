//! Хранилище схем залов и продаж.
//!
//! Координатор читает схему события один раз и дальше работает с ней в памяти;
//! в хранилище уходят только подтверждённые продажи.

pub mod cached;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{EventId, SeatId, SeatMap, SoldSeat, UserId};

pub use cached::CachedSeatStore;
pub use memory::{demo_map, InMemorySeatStore};
pub use postgres::PgSeatStore;

/// A sale confirmed by the payment subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    pub event_id: EventId,
    pub seat_ids: Vec<SeatId>,
    pub holder: UserId,
    pub transaction_id: String,
}

#[async_trait]
pub trait SeatStore: Send + Sync {
    /// `StoreError::NotFound` when the event has no provisioned map.
    async fn load_seat_map(&self, event_id: EventId) -> Result<SeatMap, StoreError>;

    /// Только проданные места события, всегда из первичного хранилища.
    async fn load_sold(&self, event_id: EventId) -> Result<Vec<SoldSeat>, StoreError> {
        Ok(self.load_seat_map(event_id).await?.sold)
    }

    /// Записывает продажу целиком; частичная запись считается ошибкой.
    async fn record_sale(&self, sale: &SaleRecord) -> Result<(), StoreError>;
}
