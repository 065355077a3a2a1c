// Event bus - named pipeline events for external observability.
//
// A thin wrapper over a tokio broadcast channel. Publishers never block and
// never fail: if nobody is listening the event is dropped, because the
// pipeline must not depend on any sink succeeding.

use tokio::sync::broadcast;

/// Events the pipeline publishes while processing submissions.
#[derive(Debug, Clone)]
pub enum ModerationEvent {
    /// A vendor batch was flushed.
    BatchProcessed {
        vendor: String,
        request_count: usize,
        cost: f64,
    },
    /// A vendor group's circuit breaker opened.
    CircuitOpened { vendor: String },
    /// A vendor group's circuit breaker closed again.
    CircuitClosed { vendor: String },
    /// A submission failed with an unexpected error.
    ProcessingError { content_id: String, cause: String },
}

/// Cloneable handle for publishing and subscribing to pipeline events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ModerationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Dropped silently when there are no subscribers.
    pub fn publish(&self, event: ModerationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(ModerationEvent::CircuitOpened {
            vendor: "openai".to_string(),
        });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(ModerationEvent::BatchProcessed {
            vendor: "openai".to_string(),
            request_count: 3,
            cost: 0.006,
        });

        match rx.recv().await.unwrap() {
            ModerationEvent::BatchProcessed {
                vendor,
                request_count,
                cost,
            } => {
                assert_eq!(vendor, "openai");
                assert_eq!(request_count, 3);
                assert!((cost - 0.006).abs() < f64::EPSILON);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
