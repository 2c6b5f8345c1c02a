use tokio::sync::broadcast;

use crate::domain::SyncPhase;

/// Change notifications for whatever UI sits on top of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SourceStatus { source: String, is_down: bool },
    ServerStatus { address: String, is_down: bool },
    ListUpdated { source: String, page: u32 },
    SearchUpdated { source: String, keyword: String, page: u32 },
    DetailsUpdated { source: String, ids: Vec<String> },
    CachesCleared,
    FreshnessProgress { processed: usize, total: usize },
    FreshnessFinished { updated: usize },
    SyncPhase(SyncPhase),
    SyncFinished { success: bool },
    SessionExpired,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        EventBus::new().emit(EngineEvent::CachesCleared);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::FreshnessProgress {
            processed: 5,
            total: 12,
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::FreshnessProgress {
                processed: 5,
                total: 12
            }
        );
    }
}
