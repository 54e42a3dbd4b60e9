use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the UI event bus; slow subscribers lag and are told how much they missed
const BUS_CAPACITY: usize = 256;

/// Events published to the UI layer
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// Raw observed property change
    Status { property: String, value: Value },
    Resumed,
    Paused,
    Stopped,
    TimePosition { seconds: f64 },
    /// The player advanced into the prefetched track; `current` is what is audible now
    AutoNext { current: Option<String> },
    /// Switch to (is_error = true) or away from (false) a non-subprocess playback path
    Fallback { is_error: bool },
    /// A command failed; suitable for a transient notification
    Error { action: String, message: String },
}

impl PlayerEvent {
    fn kind(&self) -> &'static str {
        match self {
            PlayerEvent::Status { .. } => "status",
            PlayerEvent::Resumed => "resumed",
            PlayerEvent::Paused => "paused",
            PlayerEvent::Stopped => "stopped",
            PlayerEvent::TimePosition { .. } => "time_position",
            PlayerEvent::AutoNext { .. } => "auto_next",
            PlayerEvent::Fallback { .. } => "fallback",
            PlayerEvent::Error { .. } => "error",
        }
    }
}

/// One-to-many event broadcasting (tokio::broadcast)
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PlayerEvent) {
        let kind = event.kind();
        if let Err(e) = self.tx.send(event) {
            log::debug!("No subscriber for {} event: {:?}", kind, e.0);
        }
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
    async fn per_kind_order_is_preserved() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.emit(PlayerEvent::TimePosition { seconds: i as f64 });
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap(), PlayerEvent::TimePosition { seconds: i as f64 });
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        EventBus::new().emit(PlayerEvent::Stopped);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(PlayerEvent::Fallback { is_error: true }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "fallback", "is_error": true}));
    }
}
