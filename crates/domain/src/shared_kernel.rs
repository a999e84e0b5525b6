// Shared Kernel - Tipos base y errores compartidos entre bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identificador único para aplicaciones
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub Uuid);

impl ApplicationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ApplicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identificador opaco asignado por el resource manager a una instancia desplegada.
///
/// Solo existe mientras la aplicación está en un estado con presencia en el
/// cluster (DEPLOYED/STARTING/RUNNING/CANCELLING).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterHandle(pub String);

impl ClusterHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Namespace del cluster al que apunta una aplicación.
///
/// La unicidad de nombres se garantiza por namespace, no globalmente.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub String);

impl Namespace {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Estado observado de una aplicación dentro de su ciclo de vida
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppState {
    Created,
    Deploying,
    Deployed,
    Starting,
    Running,
    Cancelling,
    Cancelled,
    Failed,
    Lost,
}

impl AppState {
    /// Estados que exigen un cluster handle presente
    pub fn requires_handle(&self) -> bool {
        matches!(
            self,
            AppState::Deployed | AppState::Starting | AppState::Running | AppState::Cancelling
        )
    }

    /// Estados que la reconciliación debe contrastar contra el cluster
    pub fn is_tracked(&self) -> bool {
        matches!(
            self,
            AppState::Deploying | AppState::Starting | AppState::Running | AppState::Cancelling
        )
    }

    /// Estados terminales (solo salen de ellos mediante un redeploy)
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppState::Cancelled | AppState::Failed | AppState::Lost)
    }

    /// Estados desde los que se permite un deploy
    pub fn is_deployable(&self) -> bool {
        matches!(self, AppState::Created) || self.is_terminal()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(AppState::Created),
            "DEPLOYING" => Some(AppState::Deploying),
            "DEPLOYED" => Some(AppState::Deployed),
            "STARTING" => Some(AppState::Starting),
            "RUNNING" => Some(AppState::Running),
            "CANCELLING" => Some(AppState::Cancelling),
            "CANCELLED" => Some(AppState::Cancelled),
            "FAILED" => Some(AppState::Failed),
            "LOST" => Some(AppState::Lost),
            _ => None,
        }
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppState::Created => "CREATED",
            AppState::Deploying => "DEPLOYING",
            AppState::Deployed => "DEPLOYED",
            AppState::Starting => "STARTING",
            AppState::Running => "RUNNING",
            AppState::Cancelling => "CANCELLING",
            AppState::Cancelled => "CANCELLED",
            AppState::Failed => "FAILED",
            AppState::Lost => "LOST",
        };
        write!(f, "{}", s)
    }
}

/// Resultado de comprobar la existencia de un nombre en el cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistenceState {
    /// Ninguna instancia con ese nombre en el namespace
    NotExists,
    /// Instancia propia y en ejecución
    ExistsRunning,
    /// Instancia propia pero parada
    ExistsStopped,
    /// Instancia ajena con el mismo nombre: no adoptar ni sobreescribir
    ForeignCollision,
    /// El cluster no respondió: un falso NOT_EXISTS provocaría submissions duplicadas
    Unknown,
}

impl fmt::Display for ExistenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExistenceState::NotExists => "NOT_EXISTS",
            ExistenceState::ExistsRunning => "EXISTS_RUNNING",
            ExistenceState::ExistsStopped => "EXISTS_STOPPED",
            ExistenceState::ForeignCollision => "NAME_COLLISION_FOREIGN",
            ExistenceState::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Errores del dominio
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Application not found: {app_id}")]
    ApplicationNotFound { app_id: ApplicationId },

    #[error("Invalid application state transition from {from} to {to}")]
    InvalidStateTransition { from: AppState, to: AppState },

    #[error("Application name '{name}' already exists in namespace '{namespace}'")]
    NameCollision { name: String, namespace: Namespace },

    #[error("Cannot deploy '{name}': cluster reports {existence} in namespace '{namespace}'")]
    ExistenceConflict {
        name: String,
        namespace: Namespace,
        existence: ExistenceState,
    },

    #[error("Another lifecycle operation is in flight for application {app_id}")]
    OperationInFlight { app_id: ApplicationId },

    #[error("Incomplete application configuration: {message}")]
    IncompleteConfiguration { message: String },

    #[error("Cluster unreachable: {message}")]
    ClusterUnreachable { message: String },

    #[error("Cluster rejected the request: {message}")]
    ClusterRejected { message: String },

    #[error("Operation '{operation}' exceeded its local wait of {waited_ms}ms; outcome unresolved")]
    OperationTimeout { operation: String, waited_ms: u64 },

    #[error("Artifact IO error: {message}")]
    ArtifactIo { message: String },

    #[error("Concurrent state change detected for application {app_id}")]
    ConcurrentStateChange { app_id: ApplicationId },

    #[error("Infrastructure error: {message}")]
    InfrastructureError { message: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;
