// ClusterClient Trait - Abstracción sobre el resource manager externo

use crate::apps::ResourceProfile;
use crate::shared_kernel::{ApplicationId, ClusterHandle, DomainError, Namespace};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Backend de cluster soportado
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterBackend {
    /// Gateway REST genérico del resource manager
    Rest,
    /// Cluster simulado en memoria (tests y desarrollo local)
    Simulated,
}

impl fmt::Display for ClusterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterBackend::Rest => write!(f, "rest"),
            ClusterBackend::Simulated => write!(f, "simulated"),
        }
    }
}

/// Petición de submission construida por el Deployment Planner.
///
/// No muta estado de cluster por sí misma; es el orquestador quien la envía.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionDescriptor {
    pub app_id: ApplicationId,
    pub name: String,
    pub namespace: Namespace,
    pub artifact: String,
    pub resources: ResourceProfile,
    pub engine_params: HashMap<String, String>,
    /// Época de deployment a la que pertenece esta submission
    pub epoch: u32,
}

/// Estado de un job según el resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterJobStatus {
    Running,
    Stopped,
    NotFound,
}

/// Instancia remota localizada por nombre en un namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteApplication {
    pub handle: ClusterHandle,
    pub status: ClusterJobStatus,
}

/// Resultado de una petición de parada
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopOutcome {
    /// Parada confirmada por el cluster
    Stopped { savepoint: Option<String> },
    /// Parada iniciada pero aún no confirmada
    Accepted,
    /// El cluster no conoce el handle
    NotFound,
}

/// Errores del cluster client
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Cluster unreachable: {0}")]
    Unreachable(String),

    #[error("Request rejected by resource manager: {0}")]
    Rejected(String),

    #[error("Cluster call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cluster backend error: {0}")]
    Backend(String),
}

impl ClusterError {
    /// Errores de transporte: el estado real del cluster es desconocido
    pub fn is_transient(&self) -> bool {
        matches!(self, ClusterError::Unreachable(_) | ClusterError::Timeout(_))
    }
}

impl From<ClusterError> for DomainError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Unreachable(message) => DomainError::ClusterUnreachable { message },
            ClusterError::Timeout(waited) => DomainError::ClusterUnreachable {
                message: format!("no response after {:?}", waited),
            },
            ClusterError::Rejected(message) => DomainError::ClusterRejected { message },
            ClusterError::Backend(message) => DomainError::InfrastructureError { message },
        }
    }
}

/// Capability sobre el resource manager externo.
///
/// Implementaciones: RestClusterClient, SimulatedClusterClient. La selección
/// por namespace la hace el ClusterRegistry de la capa de aplicación; el
/// contrato es el mismo para todos los backends. Todas las llamadas bloquean
/// en red y deben construirse con timeout explícito.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Tipo de backend
    fn backend(&self) -> ClusterBackend;

    /// Envía una submission; devuelve el handle asignado por el cluster
    async fn submit(
        &self,
        descriptor: &SubmissionDescriptor,
    ) -> std::result::Result<ClusterHandle, ClusterError>;

    /// Solicita el arranque de una instancia ya desplegada
    async fn start(&self, handle: &ClusterHandle) -> std::result::Result<(), ClusterError>;

    /// Estado actual de la instancia identificada por el handle
    async fn query_by_handle(
        &self,
        handle: &ClusterHandle,
    ) -> std::result::Result<ClusterJobStatus, ClusterError>;

    /// Busca una instancia por nombre dentro de un namespace
    async fn query_by_name(
        &self,
        name: &str,
        namespace: &Namespace,
    ) -> std::result::Result<Option<RemoteApplication>, ClusterError>;

    /// Parada ordenada, opcionalmente con savepoint previo y drain
    async fn request_stop(
        &self,
        handle: &ClusterHandle,
        savepoint_path: Option<&str>,
        drain: Option<Duration>,
    ) -> std::result::Result<StopOutcome, ClusterError>;

    /// Terminación forzosa, sin savepoint ni drain
    async fn force_stop(
        &self,
        handle: &ClusterHandle,
    ) -> std::result::Result<StopOutcome, ClusterError>;
}
