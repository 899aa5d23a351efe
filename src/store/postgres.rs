use async_trait::async_trait;
use tracing::{info, warn};

use super::{SaleRecord, SeatStore};
use crate::database::Database;
use crate::error::StoreError;
use crate::models::{EventId, SeatId, SeatLayout, SeatMap, SoldSeat, UserId};

// Продажи, у которых в базе не записан покупатель (заведены до координатора).
const LEGACY_HOLDER: &str = "legacy-sale";

#[derive(Debug, sqlx::FromRow)]
struct SeatRow {
    seat_id: String,
    section_id: String,
    row: i32,
    number: i32,
    price: f64,
    status: String,
    sold_to: Option<String>,
    transaction_id: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct SoldRow {
    seat_id: String,
    sold_to: Option<String>,
    transaction_id: Option<String>,
}

fn sold_seat(seat_id: SeatId, sold_to: Option<&str>, transaction_id: Option<String>) -> Option<SoldSeat> {
    let holder = sold_to
        .and_then(|raw| UserId::parse(raw).ok())
        .or_else(|| UserId::parse(LEGACY_HOLDER).ok())?;
    Some(SoldSeat { seat_id, holder, transaction_id })
}

// UPDATE обязан задеть все места продажи, иначе часть мест продана кому-то ещё.
fn check_written(sale: &SaleRecord, written: u64) -> Result<(), StoreError> {
    if written as usize == sale.seat_ids.len() {
        return Ok(());
    }
    Err(StoreError::PartialSale {
        transaction_id: sale.transaction_id.clone(),
        written,
        expected: sale.seat_ids.len(),
    })
}

#[derive(Clone)]
pub struct PgSeatStore {
    db: Database,
}

impl PgSeatStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SeatStore for PgSeatStore {
    async fn load_seat_map(&self, event_id: EventId) -> Result<SeatMap, StoreError> {
        let rows = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT id::TEXT AS seat_id,
                   COALESCE(category, 'general') AS section_id,
                   row,
                   number,
                   COALESCE(price, 0)::FLOAT8 AS price,
                   status,
                   sold_to,
                   transaction_id
            FROM seats
            WHERE event_id = $1
            ORDER BY row, number
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.db.pool)
        .await?;

        if rows.is_empty() {
            return Err(StoreError::NotFound(event_id));
        }

        let mut sold = Vec::new();
        let mut seats = Vec::with_capacity(rows.len());
        for row in rows {
            let seat_id = SeatId::new(row.seat_id);
            if row.status == "SOLD" {
                sold.extend(sold_seat(seat_id.clone(), row.sold_to.as_deref(), row.transaction_id));
            }
            seats.push(SeatLayout {
                seat_id,
                section_id: row.section_id,
                row: row.row,
                number: row.number,
                price: row.price,
            });
        }

        info!("Loaded {} seats for event {} ({} sold)", seats.len(), event_id, sold.len());
        Ok(SeatMap::from_seats(event_id, seats).with_sold(sold))
    }

    async fn load_sold(&self, event_id: EventId) -> Result<Vec<SoldSeat>, StoreError> {
        let rows = sqlx::query_as::<_, SoldRow>(
            r#"
            SELECT id::TEXT AS seat_id, sold_to, transaction_id
            FROM seats
            WHERE event_id = $1 AND status = 'SOLD'
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| sold_seat(SeatId::new(row.seat_id), row.sold_to.as_deref(), row.transaction_id))
            .collect())
    }

    async fn record_sale(&self, sale: &SaleRecord) -> Result<(), StoreError> {
        let ids: Vec<String> = sale.seat_ids.iter().map(|s| s.as_str().to_string()).collect();

        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = 'SOLD', sold_to = $1, transaction_id = $2, updated_at = NOW()
            WHERE event_id = $3
              AND id::TEXT = ANY($4)
              AND (status = 'FREE' OR (sold_to = $1 AND transaction_id = $2))
            "#,
        )
        .bind(sale.holder.as_str())
        .bind(&sale.transaction_id)
        .bind(sale.event_id)
        .bind(&ids)
        .execute(&self.db.pool)
        .await?;

        if let Err(e) = check_written(sale, result.rows_affected()) {
            warn!("💳 Sale for event {} not fully written: {}", sale.event_id, e);
            return Err(e);
        }
        info!("💳 Sale {} recorded, {} seats sold", sale.transaction_id, ids.len());
        Ok(())
    }
}
