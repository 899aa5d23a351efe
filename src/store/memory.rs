use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use super::{SaleRecord, SeatStore};
use crate::error::StoreError;
use crate::models::{EventId, SeatId, SeatLayout, SeatMap, SoldSeat};

/// Хранилище в памяти: локальная разработка без Postgres и тесты.
#[derive(Default)]
pub struct InMemorySeatStore {
    maps: RwLock<HashMap<EventId, SeatMap>>,
    sales: Mutex<Vec<SaleRecord>>,
}

impl InMemorySeatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_maps(maps: impl IntoIterator<Item = SeatMap>) -> Self {
        let store = Self::new();
        for map in maps {
            store.insert(map);
        }
        store
    }

    pub fn insert(&self, map: SeatMap) {
        self.maps
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(map.event_id, map);
    }

    pub fn sales(&self) -> Vec<SaleRecord> {
        self.sales.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // Проданные при заведении схемы плюс записанные продажи; поздняя запись побеждает.
    fn sold_for(&self, map: &SeatMap) -> Vec<SoldSeat> {
        let mut sold = map.sold.clone();
        let sales = self.sales.lock().unwrap_or_else(|e| e.into_inner());
        for sale in sales.iter().filter(|s| s.event_id == map.event_id) {
            for seat_id in &sale.seat_ids {
                sold.retain(|s| &s.seat_id != seat_id);
                sold.push(SoldSeat {
                    seat_id: seat_id.clone(),
                    holder: sale.holder.clone(),
                    transaction_id: Some(sale.transaction_id.clone()),
                });
            }
        }
        sold
    }

    fn map(&self, event_id: EventId) -> Result<SeatMap, StoreError> {
        self.maps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event_id)
            .cloned()
            .ok_or(StoreError::NotFound(event_id))
    }
}

#[async_trait]
impl SeatStore for InMemorySeatStore {
    async fn load_seat_map(&self, event_id: EventId) -> Result<SeatMap, StoreError> {
        let map = self.map(event_id)?;
        let sold = self.sold_for(&map);
        Ok(map.with_sold(sold))
    }

    async fn load_sold(&self, event_id: EventId) -> Result<Vec<SoldSeat>, StoreError> {
        let map = self.map(event_id)?;
        Ok(self.sold_for(&map))
    }

    async fn record_sale(&self, sale: &SaleRecord) -> Result<(), StoreError> {
        self.sales
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sale.clone());
        Ok(())
    }
}

/// Генерирует зал `rows` x `per_row`: ряды A, B, C..., места A1, A2...
/// Первая половина рядов партер, остальные балкон.
pub fn demo_map(event_id: EventId, rows: u8, per_row: u16) -> SeatMap {
    let rows = rows.min(26);
    let mut seats = Vec::with_capacity(rows as usize * per_row as usize);
    for r in 0..rows {
        let letter = char::from(b'A' + r);
        let (section, price) = if r < rows.div_ceil(2) {
            ("stalls", 80.0)
        } else {
            ("balcony", 45.0)
        };
        for n in 1..=per_row {
            seats.push(SeatLayout {
                seat_id: SeatId::new(format!("{}{}", letter, n)),
                section_id: section.to_string(),
                row: r as i32 + 1,
                number: n as i32,
                price,
            });
        }
    }
    SeatMap::from_seats(event_id, seats)
}
