use crate::shared_kernel::{AppState, ApplicationId, ClusterHandle, Namespace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Representa un evento de dominio que ha ocurrido en el sistema.
/// Los eventos son hechos inmutables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DomainEvent {
    /// Se ha registrado una nueva aplicación
    ApplicationCreated {
        app_id: ApplicationId,
        name: String,
        namespace: Namespace,
        occurred_at: DateTime<Utc>,
    },
    /// El estado de una aplicación ha cambiado
    ApplicationStateChanged {
        app_id: ApplicationId,
        old_state: AppState,
        new_state: AppState,
        occurred_at: DateTime<Utc>,
    },
    /// Una submission fue aceptada por el cluster
    ApplicationDeployed {
        app_id: ApplicationId,
        handle: ClusterHandle,
        epoch: u32,
        occurred_at: DateTime<Utc>,
    },
    /// Se registró la localización de un savepoint producido al cancelar
    SavepointRecorded {
        app_id: ApplicationId,
        path: String,
        occurred_at: DateTime<Utc>,
    },
    /// El handle desapareció del cluster sin parada ordenada
    ApplicationLost {
        app_id: ApplicationId,
        last_handle: Option<ClusterHandle>,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn app_id(&self) -> &ApplicationId {
        match self {
            DomainEvent::ApplicationCreated { app_id, .. }
            | DomainEvent::ApplicationStateChanged { app_id, .. }
            | DomainEvent::ApplicationDeployed { app_id, .. }
            | DomainEvent::SavepointRecorded { app_id, .. }
            | DomainEvent::ApplicationLost { app_id, .. } => app_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::ApplicationCreated { occurred_at, .. }
            | DomainEvent::ApplicationStateChanged { occurred_at, .. }
            | DomainEvent::ApplicationDeployed { occurred_at, .. }
            | DomainEvent::SavepointRecorded { occurred_at, .. }
            | DomainEvent::ApplicationLost { occurred_at, .. } => *occurred_at,
        }
    }

    /// Nombre corto del evento para logging
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ApplicationCreated { .. } => "ApplicationCreated",
            DomainEvent::ApplicationStateChanged { .. } => "ApplicationStateChanged",
            DomainEvent::ApplicationDeployed { .. } => "ApplicationDeployed",
            DomainEvent::SavepointRecorded { .. } => "SavepointRecorded",
            DomainEvent::ApplicationLost { .. } => "ApplicationLost",
        }
    }
}
