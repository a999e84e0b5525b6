//! Event Bus adapters
//!
//! `LoggingEventBus` deja cada evento en el log estructurado; `InMemoryEventBus`
//! los acumula para inspección en tests y herramientas locales.

use async_trait::async_trait;
use std::sync::Mutex;
use streamops_domain::event_bus::{EventBus, EventBusError};
use streamops_domain::events::DomainEvent;
use tracing::info;

/// Bus que publica eventos como trazas estructuradas
#[derive(Debug, Default, Clone)]
pub struct LoggingEventBus;

impl LoggingEventBus {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventBus for LoggingEventBus {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventBusError> {
        info!(
            event = event.kind(),
            app_id = %event.app_id(),
            occurred_at = %event.occurred_at(),
            "domain event"
        );
        Ok(())
    }
}

/// Bus en memoria que registra los eventos publicados
#[derive(Default)]
pub struct InMemoryEventBus {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventBusError> {
        self.events
            .lock()
            .map_err(|e| EventBusError::PublishFailed(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use streamops_domain::shared_kernel::{ApplicationId, Namespace};

    #[tokio::test]
    async fn test_in_memory_bus_records_events() {
        let bus = InMemoryEventBus::new();
        let event = DomainEvent::ApplicationCreated {
            app_id: ApplicationId::new(),
            name: "job1".into(),
            namespace: Namespace::new("ns1"),
            occurred_at: Utc::now(),
        };
        bus.publish(&event).await.unwrap();
        assert_eq!(bus.events().len(), 1);
    }
}
