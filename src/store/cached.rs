use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{SaleRecord, SeatStore};
use crate::error::StoreError;
use crate::models::{EventId, SeatMap, SoldSeat};
use crate::redis_client::RedisClient;

const SEAT_MAP_TTL_SECS: u64 = 86400; // 24 часа

/// Read-through кеш схем залов в Redis поверх любого `SeatStore`.
///
/// В Redis лежит только неизменяемая раскладка зала. Проданные места
/// меняются при каждой продаже, поэтому всегда читаются из `inner`.
#[derive(Clone)]
pub struct CachedSeatStore {
    redis: RedisClient,
    inner: Arc<dyn SeatStore>,
}

fn seat_map_key(event_id: EventId) -> String {
    format!("seatmap:{}", event_id)
}

fn layout_only(map: &SeatMap) -> SeatMap {
    SeatMap {
        sold: Vec::new(),
        ..map.clone()
    }
}

impl CachedSeatStore {
    pub fn new(redis: RedisClient, inner: Arc<dyn SeatStore>) -> Self {
        Self { redis, inner }
    }

    async fn get_from_cache(&self, event_id: EventId) -> Result<Option<SeatMap>, StoreError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(seat_map_key(event_id)).await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_to_cache(&self, map: &SeatMap) -> Result<(), StoreError> {
        let data = serde_json::to_string(&layout_only(map))?;
        let mut conn = self.redis.conn.clone();
        let _: () = conn.set_ex(seat_map_key(map.event_id), data, SEAT_MAP_TTL_SECS).await?;
        Ok(())
    }
}

#[async_trait]
impl SeatStore for CachedSeatStore {
    async fn load_seat_map(&self, event_id: EventId) -> Result<SeatMap, StoreError> {
        // Сначала пробуем кеш
        match self.get_from_cache(event_id).await {
            Ok(Some(layout)) => {
                debug!("Seat map for event {} served from cache", event_id);
                let sold = self.inner.load_sold(event_id).await?;
                return Ok(layout.with_sold(sold));
            }
            Ok(None) => {}
            Err(e) => warn!("Seat map cache read failed for event {}: {}", event_id, e),
        }

        // Если кеша нет или он не работает - идем в хранилище
        let map = self.inner.load_seat_map(event_id).await?;
        if let Err(e) = self.save_to_cache(&map).await {
            warn!("Seat map cache write failed for event {}: {}", event_id, e);
        }
        Ok(map)
    }

    async fn load_sold(&self, event_id: EventId) -> Result<Vec<SoldSeat>, StoreError> {
        self.inner.load_sold(event_id).await
    }

    async fn record_sale(&self, sale: &SaleRecord) -> Result<(), StoreError> {
        self.inner.record_sale(sale).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::store::demo_map;

    #[test]
    fn cached_layout_carries_no_sales() {
        let map = demo_map(3, 1, 2).with_sold(vec![SoldSeat {
            seat_id: "A1".into(),
            holder: UserId::parse("u1").unwrap(),
            transaction_id: Some("tx".to_string()),
        }]);

        let cached = layout_only(&map);
        assert!(cached.sold.is_empty());
        assert_eq!(cached.seats, map.seats);
        assert_eq!(cached.sections, map.sections);

        let json = serde_json::to_string(&cached).unwrap();
        assert!(!json.contains("u1"));
    }
}
