use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY per room type.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a room type. Creates the channel if needed.
    pub fn subscribe(&self, room_type_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(room_type_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, room_type_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&room_type_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the room type is deleted).
    pub fn remove(&self, room_type_id: &Ulid) {
        self.channels.remove(room_type_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rt = Ulid::new();
        let mut rx = hub.subscribe(rt);

        let event = Event::RoomTypeCreated {
            id: rt,
            hotel_id: Ulid::new(),
            name: Some("suite".into()),
        };
        hub.send(rt, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rt = Ulid::new();
        // No subscriber — should not panic
        hub.send(rt, &Event::RoomTypeDeleted { id: rt });
    }

    #[tokio::test]
    async fn removed_channel_stops_delivery() {
        let hub = NotifyHub::new();
        let rt = Ulid::new();
        let mut rx = hub.subscribe(rt);
        hub.remove(&rt);
        hub.send(rt, &Event::RoomTypeDeleted { id: rt });
        assert!(rx.try_recv().is_err());
    }
}
