// src/core/events.rs
use crate::types::EngineEvent;
use tokio::sync::mpsc;
use tracing::error;

/// Outbound side of the engine. Sending never blocks: a full channel drops
/// the event, a missing channel ignores it.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    sender: Option<mpsc::Sender<EngineEvent>>,
}

impl EventBus {
    pub fn new(sender: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn send(&self, event: EngineEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Event channel closed! Listener is likely gone.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drops_events_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let bus = EventBus::new(tx);
        bus.send(EngineEvent::Message("first".to_string()));
        bus.send(EngineEvent::Message("second".to_string()));

        match rx.recv().await {
            Some(EngineEvent::Message(text)) => assert_eq!(text, "first"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnected_bus_is_silent() {
        EventBus::disconnected().send(EngineEvent::Message("nobody".to_string()));
    }
}
