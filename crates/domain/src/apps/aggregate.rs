// Application Aggregate
// Maneja el lifecycle completo de aplicaciones streaming: deploy, start, cancel

use crate::shared_kernel::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Recursos declarados para una aplicación
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Paralelismo del job
    pub parallelism: u32,
    /// Slots por task manager
    pub task_slots: u32,
    /// Memoria en MB
    pub memory_mb: u64,
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            parallelism: 1,
            task_slots: 1,
            memory_mb: 1024,
        }
    }
}

/// Configuración declarada de una aplicación.
///
/// `artifact` y `resources` son opcionales en el registro pero obligatorios
/// para poder desplegar; el Deployment Planner valida la completitud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    /// Nombre legible, único dentro del namespace destino
    pub name: String,
    /// Namespace/cola del cluster destino
    pub namespace: Namespace,
    /// Referencia al artefacto desplegable (ruta o URI)
    pub artifact: Option<String>,
    /// Recursos solicitados
    pub resources: Option<ResourceProfile>,
    /// Parámetros específicos del motor de streaming
    pub engine_params: HashMap<String, String>,
}

impl AppSpec {
    pub fn new(name: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            name: name.into(),
            namespace,
            artifact: None,
            resources: None,
            engine_params: HashMap::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn with_resources(mut self, resources: ResourceProfile) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_engine_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.engine_params.insert(key.into(), value.into());
        self
    }
}

/// Agregado Application - intención persistida del ciclo de vida
///
/// Invariante central: `cluster_handle` presente si y solo si el estado
/// tiene presencia esperada en el cluster (ver `AppState::requires_handle`).
/// Todas las transiciones pasan por los métodos `mark_*`, que lo garantizan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Identificador único
    pub id: ApplicationId,
    /// Configuración declarada
    pub spec: AppSpec,
    /// Estado observado
    pub state: AppState,
    /// Handle asignado por el resource manager
    pub cluster_handle: Option<ClusterHandle>,
    /// Último handle conocido, retenido tras limpiar `cluster_handle`.
    /// Permite distinguir una instancia propia parada de una colisión ajena
    /// y deja rastro de auditoría entre épocas de deployment.
    pub last_handle: Option<ClusterHandle>,
    /// Época de deployment (se incrementa en cada redeploy)
    pub deploy_epoch: u32,
    /// Última localización de savepoint registrada
    pub savepoint_path: Option<String>,
    /// Causa del último fallo
    pub error_message: Option<String>,
    /// Fecha de creación
    pub created_at: DateTime<Utc>,
    /// Fecha del último deploy confirmado
    pub last_deployed_at: Option<DateTime<Utc>>,
    /// Fecha del último cambio de estado
    pub state_changed_at: DateTime<Utc>,
}

impl Application {
    pub fn new(id: ApplicationId, spec: AppSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            spec,
            state: AppState::Created,
            cluster_handle: None,
            last_handle: None,
            deploy_epoch: 0,
            savepoint_path: None,
            error_message: None,
            created_at: now,
            last_deployed_at: None,
            state_changed_at: now,
        }
    }

    fn transition(&mut self, to: AppState) {
        self.state = to;
        self.state_changed_at = Utc::now();
    }

    fn invalid(&self, to: AppState) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.state,
            to,
        }
    }

    /// Inicia una nueva época de deployment.
    ///
    /// Permitido desde CREATED o cualquier estado terminal (redeploy). El
    /// handle de la época anterior queda descartado; `last_handle` conserva
    /// su rastro de auditoría.
    pub fn mark_deploying(&mut self) -> Result<()> {
        if !self.state.is_deployable() {
            return Err(self.invalid(AppState::Deploying));
        }
        self.deploy_epoch += 1;
        self.error_message = None;
        self.transition(AppState::Deploying);
        Ok(())
    }

    /// Registra el handle devuelto por el cluster tras una submission aceptada
    pub fn mark_deployed(&mut self, handle: ClusterHandle) -> Result<()> {
        if self.state != AppState::Deploying {
            return Err(self.invalid(AppState::Deployed));
        }
        self.last_handle = Some(handle.clone());
        self.cluster_handle = Some(handle);
        self.last_deployed_at = Some(Utc::now());
        self.transition(AppState::Deployed);
        Ok(())
    }

    /// La submission falló: la aplicación vuelve a CREATED sin handle.
    /// No se reintenta automáticamente (la submission no es idempotente).
    pub fn revert_to_created(&mut self, error: impl Into<String>) -> Result<()> {
        if self.state != AppState::Deploying {
            return Err(self.invalid(AppState::Created));
        }
        self.cluster_handle = None;
        self.error_message = Some(error.into());
        self.transition(AppState::Created);
        Ok(())
    }

    /// Transición optimista previa a la petición de arranque
    pub fn mark_starting(&mut self) -> Result<()> {
        if self.state != AppState::Deployed {
            return Err(self.invalid(AppState::Starting));
        }
        self.transition(AppState::Starting);
        Ok(())
    }

    /// El cluster confirmó la ejecución
    pub fn mark_running(&mut self) -> Result<()> {
        if self.state != AppState::Starting {
            return Err(self.invalid(AppState::Running));
        }
        self.transition(AppState::Running);
        Ok(())
    }

    /// Transición inmediata al solicitar la cancelación, visible para la
    /// reconciliación antes de que el cluster confirme nada
    pub fn mark_cancelling(&mut self) -> Result<()> {
        if !matches!(self.state, AppState::Running | AppState::Starting) {
            return Err(self.invalid(AppState::Cancelling));
        }
        self.transition(AppState::Cancelling);
        Ok(())
    }

    /// Parada confirmada por el cluster: limpia el handle y registra el
    /// savepoint producido, si lo hubo
    pub fn mark_cancelled(&mut self, savepoint: Option<String>) -> Result<()> {
        if self.state != AppState::Cancelling {
            return Err(self.invalid(AppState::Cancelled));
        }
        self.cluster_handle = None;
        if savepoint.is_some() {
            self.savepoint_path = savepoint;
        }
        self.transition(AppState::Cancelled);
        Ok(())
    }

    /// Fallo irrecuperable de submission o arranque
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<()> {
        if self.state.is_terminal() {
            return Err(self.invalid(AppState::Failed));
        }
        self.cluster_handle = None;
        self.error_message = Some(error.into());
        self.transition(AppState::Failed);
        Ok(())
    }

    /// El handle desapareció del cluster sin parada ordenada.
    /// Devuelve el handle perdido para el log de auditoría.
    pub fn mark_lost(&mut self) -> Result<Option<ClusterHandle>> {
        if !self.state.is_tracked() {
            return Err(self.invalid(AppState::Lost));
        }
        let lost_handle = self.cluster_handle.take();
        self.transition(AppState::Lost);
        Ok(lost_handle)
    }

    /// Comprueba el invariante handle <-> estado
    pub fn handle_invariant_holds(&self) -> bool {
        self.cluster_handle.is_some() == self.state.requires_handle()
    }
}

/// Puerto de persistencia para aplicaciones.
///
/// `compare_and_set_state` persiste el registro completo solo si el estado
/// almacenado coincide con `expected`; es la base para que reconciliación y
/// operaciones de operador no se pisen.
#[async_trait::async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn save(&self, app: &Application) -> Result<()>;
    async fn find_by_id(&self, id: &ApplicationId) -> Result<Option<Application>>;
    async fn find_by_name(&self, name: &str, namespace: &Namespace)
        -> Result<Option<Application>>;
    async fn find_by_states(&self, states: &[AppState]) -> Result<Vec<Application>>;
    async fn update(&self, app: &Application) -> Result<()>;
    async fn compare_and_set_state(&self, expected: AppState, app: &Application) -> Result<bool>;
    async fn delete(&self, id: &ApplicationId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_app() -> Application {
        let spec = AppSpec::new("wordcount", Namespace::new("ns1"))
            .with_artifact("/artifacts/wordcount.jar")
            .with_resources(ResourceProfile::default());
        Application::new(ApplicationId::new(), spec)
    }

    fn deployed_app() -> Application {
        let mut app = sample_app();
        app.mark_deploying().unwrap();
        app.mark_deployed(ClusterHandle::new("h1")).unwrap();
        app
    }

    #[test]
    fn test_full_lifecycle_keeps_handle_invariant() {
        let mut app = sample_app();
        assert!(app.handle_invariant_holds());

        app.mark_deploying().unwrap();
        assert!(app.handle_invariant_holds());

        app.mark_deployed(ClusterHandle::new("h1")).unwrap();
        assert!(app.handle_invariant_holds());
        assert!(app.last_deployed_at.is_some());

        app.mark_starting().unwrap();
        app.mark_running().unwrap();
        app.mark_cancelling().unwrap();
        assert!(app.handle_invariant_holds());

        app.mark_cancelled(Some("/sp/1".into())).unwrap();
        assert!(app.handle_invariant_holds());
        assert_eq!(app.cluster_handle, None);
        assert_eq!(app.savepoint_path.as_deref(), Some("/sp/1"));
    }

    #[test]
    fn test_cancel_requires_running_or_starting() {
        let mut app = deployed_app();
        let err = app.mark_cancelling().unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));

        app.mark_starting().unwrap();
        assert!(app.mark_cancelling().is_ok());
    }

    #[test]
    fn test_redeploy_bumps_epoch_and_discards_handle() {
        let mut app = deployed_app();
        app.mark_starting().unwrap();
        app.mark_running().unwrap();
        app.mark_failed("boom").unwrap();
        assert_eq!(app.cluster_handle, None);

        app.mark_deploying().unwrap();
        assert_eq!(app.cluster_handle, None);
        assert_eq!(app.deploy_epoch, 2);
        assert_eq!(app.error_message, None);
        // El rastro de la época anterior sobrevive para auditoría
        assert_eq!(app.last_handle, Some(ClusterHandle::new("h1")));
    }

    #[test]
    fn test_mark_lost_returns_audited_handle() {
        let mut app = deployed_app();
        app.mark_starting().unwrap();
        let lost = app.mark_lost().unwrap();
        assert_eq!(lost, Some(ClusterHandle::new("h1")));
        assert_eq!(app.state, AppState::Lost);
        assert!(app.handle_invariant_holds());
        // El último handle conocido queda retenido para auditoría
        assert_eq!(app.last_handle, Some(ClusterHandle::new("h1")));
    }

    #[test]
    fn test_failed_submission_reverts_to_created() {
        let mut app = sample_app();
        app.mark_deploying().unwrap();
        app.revert_to_created("quota exceeded").unwrap();
        assert_eq!(app.state, AppState::Created);
        assert_eq!(app.cluster_handle, None);
        assert_eq!(app.error_message.as_deref(), Some("quota exceeded"));
        // La época consumida no se reutiliza
        assert_eq!(app.deploy_epoch, 1);
    }

    #[test]
    fn test_terminal_states_reject_further_transitions() {
        let mut app = deployed_app();
        app.mark_starting().unwrap();
        app.mark_running().unwrap();
        app.mark_cancelling().unwrap();
        app.mark_cancelled(None).unwrap();

        assert!(app.mark_running().is_err());
        assert!(app.mark_cancelling().is_err());
        assert!(app.mark_failed("late").is_err());
        // Salvo el redeploy, que abre una época nueva
        assert!(app.mark_deploying().is_ok());
    }
}
