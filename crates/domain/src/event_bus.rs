//! Puerto de publicación de eventos de dominio.
//!
//! Los fallos de publicación nunca alteran el resultado de una operación de
//! ciclo de vida: los call-sites los registran en el log y continúan.

use crate::events::DomainEvent;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("Failed to publish event: {0}")]
    PublishFailed(String),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publica un evento de dominio
    async fn publish(&self, event: &DomainEvent) -> Result<(), EventBusError>;
}
