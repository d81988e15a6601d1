//! Event Publisher Adapter
//!
//! Implements the `EventPublisher` port for logs and for tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::events::LifecycleEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Publishes lifecycle events to the tracing subscriber.
///
/// Problem events (failures, corruption) are always logged at warn level;
/// progress events go out at info or debug depending on how the publisher
/// was built.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    progress_at_info: bool,
}

impl LoggingEventPublisher {
    pub fn info_level() -> Self {
        Self {
            progress_at_info: true,
        }
    }

    pub fn debug_level() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: LifecycleEvent) -> Result<()> {
        let event_type = event.event_type();
        let drives = event.drives().join(",");
        let json = serde_json::to_string(&event)?;

        if event.is_problem() {
            warn!(event_type, drives = %drives, event = %json, "Bryck event");
        } else if self.progress_at_info {
            info!(event_type, event = %json, "Bryck event");
        } else {
            debug!(event_type, event = %json, "Bryck event");
        }
        Ok(())
    }
}

/// Keeps every published event, for assertions.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<LifecycleEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events whose `event_type()` equals `event_type`, oldest first.
    pub fn events_of_type(&self, event_type: &str) -> Vec<LifecycleEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Event type names in publication order.
    pub fn timeline(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.event_type()).collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: LifecycleEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}
