use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, SeatId, SeatStatus, UserId};

/// Состояние одного места в снапшоте.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub seat_id: SeatId,
    pub status: SeatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_until: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Full state of an event's seats, sent on join and on resync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSnapshot {
    pub event_id: EventId,
    pub seats: Vec<SeatView>,
    pub timestamp: DateTime<Utc>,
}

/// One committed transition of one seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatUpdate {
    pub seat_id: SeatId,
    pub status: SeatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_until: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Дельта, рассылаемая всем подписчикам события.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatUpdateEvent {
    pub event_id: EventId,
    pub updates: Vec<SeatUpdate>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub event_id: EventId,
    pub available: u32,
    pub reserved: u32,
    pub occupied: u32,
}
