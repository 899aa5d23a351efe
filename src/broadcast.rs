//! Рассылка дельт по местам подписчикам одного события.
//!
//! На каждое событие заводится свой `tokio::sync::broadcast` канал, поэтому
//! подписчики других событий дельты не получают вовсе. Публикация идёт под
//! замком события в арбитре, так что порядок дельт по одному месту совпадает
//! с порядком коммитов.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{EventId, SeatUpdateEvent};

pub type UpdateReceiver = broadcast::Receiver<Arc<SeatUpdateEvent>>;

#[derive(Debug)]
pub struct EventChannel {
    event_id: EventId,
    sender: broadcast::Sender<Arc<SeatUpdateEvent>>,
}

impl EventChannel {
    pub fn new(event_id: EventId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { event_id, sender }
    }

    pub fn subscribe(&self) -> UpdateReceiver {
        self.sender.subscribe()
    }

    /// Returns how many subscribers the update was queued for.
    pub fn publish(&self, update: SeatUpdateEvent) -> usize {
        match self.sender.send(Arc::new(update)) {
            Ok(receivers) => receivers,
            Err(_) => {
                // Никто не подписан: состояние уже закоммичено, просто некому слать.
                debug!("No subscribers for event {}, update dropped", self.event_id);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn update(event_id: EventId) -> SeatUpdateEvent {
        SeatUpdateEvent {
            event_id,
            updates: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let channel = EventChannel::new(1, 16);
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();

        assert_eq!(channel.publish(update(1)), 2);
        assert_eq!(a.recv().await.unwrap().event_id, 1);
        assert_eq!(b.recv().await.unwrap().event_id, 1);
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let channel = EventChannel::new(3, 4);
        assert_eq!(channel.publish(update(3)), 0);
        assert_eq!(channel.subscriber_count(), 0);
    }
}
