//! In-process event publication for loop observers.

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use driftwatch_types::{events::LoopEvent, Result};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: LoopEvent) -> Result<()>;
    fn subscribe(&self) -> BoxStream<'static, LoopEvent>;
}

/// Broadcast-channel bus. Publishing with no subscribers is not an error;
/// slow subscribers skip events they lagged behind on.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<LoopEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: LoopEvent) -> Result<()> {
        if self.tx.send(event).is_err() {
            trace!("no event subscribers");
        }
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, LoopEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }
}

/// Bus that drops everything.
#[derive(Clone, Copy, Default)]
pub struct NullBus;

#[async_trait]
impl EventBus for NullBus {
    async fn publish(&self, _event: LoopEvent) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, LoopEvent> {
        futures::stream::empty().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwatch_types::events::{EventKind, LifecyclePhase};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = LocalBus::new(8);
        let mut events = bus.subscribe();
        bus.publish(LoopEvent::lifecycle(LifecyclePhase::Boot, "boot"))
            .await
            .expect("publish");
        let received = events.next().await.expect("event");
        assert_eq!(received.kind, EventKind::Lifecycle);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = LocalBus::new(1);
        assert!(bus
            .publish(LoopEvent::lifecycle(LifecyclePhase::Shutdown, "done"))
            .await
            .is_ok());
        assert!(NullBus.subscribe().next().await.is_none());
    }
}
