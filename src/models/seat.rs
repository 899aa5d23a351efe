use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::UserId;

pub type EventId = i64;

/// Идентификатор места, уникален в пределах схемы зала одного события.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(String);

impl SeatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SeatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SeatId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Reserved,
    Occupied,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "available",
            SeatStatus::Reserved => "reserved",
            SeatStatus::Occupied => "occupied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub section_id: String,
    pub name: String,
    pub capacity: u32,
}

/// Неизменяемое описание места: ряд, номер, секция, цена.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatLayout {
    pub seat_id: SeatId,
    pub section_id: String,
    pub row: i32,
    pub number: i32,
    pub price: f64,
}

/// Место, проданное до старта координатора.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoldSeat {
    pub seat_id: SeatId,
    pub holder: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Seat map of one event. Shape never changes once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatMap {
    pub event_id: EventId,
    pub sections: Vec<Section>,
    pub seats: Vec<SeatLayout>,
    #[serde(default)]
    pub sold: Vec<SoldSeat>,
}

impl SeatMap {
    /// Строит схему из списка мест; секции выводятся из `section_id`.
    pub fn from_seats(event_id: EventId, seats: Vec<SeatLayout>) -> Self {
        let mut capacity: BTreeMap<String, u32> = BTreeMap::new();
        for seat in &seats {
            *capacity.entry(seat.section_id.clone()).or_insert(0) += 1;
        }

        let sections = capacity
            .into_iter()
            .map(|(section_id, capacity)| Section {
                name: section_id.clone(),
                section_id,
                capacity,
            })
            .collect();

        Self {
            event_id,
            sections,
            seats,
            sold: Vec::new(),
        }
    }

    pub fn with_sold(mut self, sold: Vec<SoldSeat>) -> Self {
        self.sold = sold;
        self
    }

    pub fn seat(&self, seat_id: &SeatId) -> Option<&SeatLayout> {
        self.seats.iter().find(|s| &s.seat_id == seat_id)
    }

    pub fn capacity(&self) -> usize {
        self.seats.len()
    }
}
