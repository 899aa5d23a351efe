//! JSON-сообщения WebSocket-протокола координатора мест.
//!
//! Клиент шлёт намерения с тегом `action`, сервер отвечает сообщениями с
//! тегом `type`. Все поля в camelCase.

use serde::{Deserialize, Serialize};

use crate::arbiter::{BatchOutcome, SeatAction, SeatConflict};
use crate::models::{EventId, SeatId, SeatSnapshot, SeatUpdateEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinEvent {
        event_id: EventId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    LeaveEvent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<EventId>,
    },
    ReserveSeats {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<EventId>,
        seat_ids: Vec<SeatId>,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    ReleaseSeats {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<EventId>,
        seat_ids: Vec<SeatId>,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
    OccupySeats {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<EventId>,
        seat_ids: Vec<SeatId>,
        user_id: String,
        transaction_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

impl ClientMessage {
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ClientMessage::JoinEvent { request_id, .. }
            | ClientMessage::ReserveSeats { request_id, .. }
            | ClientMessage::ReleaseSeats { request_id, .. }
            | ClientMessage::OccupySeats { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

/// Прямой ответ арбитра на намерение клиента.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub event_id: EventId,
    pub action: SeatAction,
    pub granted: Vec<SeatId>,
    pub conflicts: Vec<SeatConflict>,
    #[serde(default)]
    pub skipped: Vec<SeatId>,
}

impl ActionResult {
    pub fn from_outcome(request_id: Option<u64>, outcome: BatchOutcome) -> Self {
        Self {
            request_id,
            event_id: outcome.event_id,
            action: outcome.action,
            granted: outcome.granted,
            conflicts: outcome.conflicts,
            skipped: outcome.skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Snapshot(SeatSnapshot),
    SeatUpdate(SeatUpdateEvent),
    ActionResult(ActionResult),
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::ConflictReason;
    use serde_json::json;

    #[test]
    fn parses_reserve_intent() {
        let raw = json!({
            "action": "reserveSeats",
            "seatIds": ["A1", "A2"],
            "userId": "u1",
            "requestId": 3
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(
            msg,
            ClientMessage::ReserveSeats {
                event_id: None,
                seat_ids: vec![SeatId::from("A1"), SeatId::from("A2")],
                user_id: "u1".to_string(),
                request_id: Some(3),
            }
        );
        assert_eq!(msg.request_id(), Some(3));
    }

    #[test]
    fn parses_join() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"action": "joinEvent", "eventId": 12})).unwrap();
        assert_eq!(msg, ClientMessage::JoinEvent { event_id: 12, request_id: None });
    }

    #[test]
    fn unknown_action_is_rejected() {
        let raw = json!({"action": "stealSeats", "seatIds": ["A1"]});
        assert!(serde_json::from_value::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn action_result_wire_shape() {
        let msg = ServerMessage::ActionResult(ActionResult {
            request_id: None,
            event_id: 1,
            action: SeatAction::Reserve,
            granted: vec![SeatId::from("A1")],
            conflicts: vec![SeatConflict {
                seat_id: SeatId::from("B1"),
                reason: ConflictReason::Reserved,
            }],
            skipped: vec![],
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "actionResult");
        assert_eq!(value["action"], "reserve");
        assert_eq!(value["conflicts"][0]["seatId"], "B1");
        assert_eq!(value["conflicts"][0]["reason"], "reserved");
        assert!(value.get("requestId").is_none());

        let back: ServerMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
