use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Created { id: Uuid },
    Updated { id: Uuid },
    Moved { id: Uuid, new_parent: Uuid },
    Deleted { id: Uuid },
    Restored { id: Uuid },
    Shared { id: Uuid, user: String },
    Unshared { id: Uuid, user: String },
    LinkRedeemed { id: Uuid, user: String },
    Commented { id: Uuid, thread: Uuid },
}

impl Event {
    /// Node the event is about; subscribers only see events on nodes they
    /// can view.
    pub fn node_id(&self) -> Uuid {
        match self {
            Event::Created { id }
            | Event::Updated { id }
            | Event::Moved { id, .. }
            | Event::Deleted { id }
            | Event::Restored { id }
            | Event::Shared { id, .. }
            | Event::Unshared { id, .. }
            | Event::LinkRedeemed { id, .. }
            | Event::Commented { id, .. } => *id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.send(Event::LinkRedeemed {
            id,
            user: "bob".into(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.node_id(), id);
        let json = serde_json::to_value(&got).unwrap();
        assert_eq!(json["type"], "link_redeemed");
        assert_eq!(json["user"], "bob");
    }
}
