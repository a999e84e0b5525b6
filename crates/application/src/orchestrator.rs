//! Lifecycle Orchestrator
//!
//! Ejecuta las transiciones deploy -> start -> running -> cancel contra el
//! cluster y persiste cada paso. La intención local se escribe antes de cada
//! llamada de red (transiciones optimistas) y la reconciliación periódica
//! resuelve los resultados ambiguos.

use crate::canceller::SavepointCanceller;
use crate::cluster_registry::ClusterRegistry;
use crate::existence::ExistenceResolver;
use crate::ops_gate::OperationGate;
use crate::planner::DeploymentPlanner;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use streamops_domain::apps::{AppSpec, Application, ApplicationRepository};
use streamops_domain::cluster::ClusterJobStatus;
use streamops_domain::event_bus::EventBus;
use streamops_domain::events::DomainEvent;
use streamops_domain::shared_kernel::{
    AppState, ApplicationId, DomainError, ExistenceState, Namespace, Result,
};
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Espera máxima a que el cluster confirme un arranque
    pub start_confirm_timeout: Duration,
    /// Intervalo entre sondas durante la confirmación de arranque
    pub start_poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            start_confirm_timeout: Duration::from_secs(60),
            start_poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct LifecycleOrchestrator {
    repository: Arc<dyn ApplicationRepository>,
    clusters: Arc<ClusterRegistry>,
    planner: DeploymentPlanner,
    resolver: ExistenceResolver,
    canceller: SavepointCanceller,
    gate: Arc<OperationGate>,
    event_bus: Arc<dyn EventBus>,
    config: OrchestratorConfig,
}

impl LifecycleOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn ApplicationRepository>,
        clusters: Arc<ClusterRegistry>,
        planner: DeploymentPlanner,
        resolver: ExistenceResolver,
        canceller: SavepointCanceller,
        gate: Arc<OperationGate>,
        event_bus: Arc<dyn EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            repository,
            clusters,
            planner,
            resolver,
            canceller,
            gate,
            event_bus,
            config,
        }
    }

    /// Registra una nueva aplicación en estado CREATED
    pub async fn create(&self, spec: AppSpec) -> Result<ApplicationId> {
        if spec.name.trim().is_empty() {
            return Err(DomainError::IncompleteConfiguration {
                message: "application name is empty".into(),
            });
        }
        if spec.namespace.as_str().trim().is_empty() {
            return Err(DomainError::IncompleteConfiguration {
                message: "target namespace is empty".into(),
            });
        }
        if self
            .repository
            .find_by_name(&spec.name, &spec.namespace)
            .await?
            .is_some()
        {
            return Err(DomainError::NameCollision {
                name: spec.name.clone(),
                namespace: spec.namespace.clone(),
            });
        }

        let app = Application::new(ApplicationId::new(), spec);
        self.repository.save(&app).await?;
        info!(app_id = %app.id, name = %app.spec.name, namespace = %app.spec.namespace, "application created");
        self.emit(DomainEvent::ApplicationCreated {
            app_id: app.id.clone(),
            name: app.spec.name.clone(),
            namespace: app.spec.namespace.clone(),
            occurred_at: Utc::now(),
        })
        .await;
        Ok(app.id)
    }

    /// Despliega (o redespliega) una aplicación.
    ///
    /// La submission no es idempotente frente a efectos parciales en el
    /// cluster: si falla, el estado revierte a CREATED y el error se propaga
    /// sin reintento automático.
    pub async fn deploy(&self, app_id: &ApplicationId, backup_previous: bool) -> Result<AppState> {
        let _permit = self.gate.acquire(app_id, "deploy")?;
        let mut app = self.load(app_id).await?;

        if !app.state.is_deployable() {
            return Err(DomainError::InvalidStateTransition {
                from: app.state,
                to: AppState::Deploying,
            });
        }

        let existence = self.resolver.resolve(&app).await?;
        match existence {
            ExistenceState::NotExists | ExistenceState::ExistsStopped => {}
            other => {
                return Err(DomainError::ExistenceConflict {
                    name: app.spec.name.clone(),
                    namespace: app.spec.namespace.clone(),
                    existence: other,
                });
            }
        }

        // El plan (incluido el backup del artefacto) ocurre antes de tocar
        // estado alguno: un fallo de IO aborta sin efectos.
        let descriptor = self.planner.plan(&app, backup_previous).await?;

        let prior_state = app.state;
        app.mark_deploying()?;
        if prior_state.is_terminal() {
            if let Some(handle) = &app.last_handle {
                warn!(
                    app_id = %app.id,
                    prior_handle = %handle,
                    epoch = app.deploy_epoch,
                    "redeploy discards the previous cluster handle"
                );
            }
        }
        self.cas(prior_state, &app).await?;
        self.emit_state_changed(&app, prior_state, AppState::Deploying)
            .await;

        let client = self.clusters.for_namespace(&app.spec.namespace);
        match client.submit(&descriptor).await {
            Ok(handle) => {
                info!(app_id = %app.id, handle = %handle, epoch = descriptor.epoch, "submission accepted");
                app.mark_deployed(handle.clone())?;
                self.cas(AppState::Deploying, &app).await?;
                self.emit_state_changed(&app, AppState::Deploying, AppState::Deployed)
                    .await;
                self.emit(DomainEvent::ApplicationDeployed {
                    app_id: app.id.clone(),
                    handle,
                    epoch: app.deploy_epoch,
                    occurred_at: Utc::now(),
                })
                .await;
                Ok(AppState::Deployed)
            }
            Err(err) => {
                let cause: DomainError = err.into();
                warn!(app_id = %app.id, error = %cause, "submission failed; reverting to CREATED");
                app.revert_to_created(cause.to_string())?;
                self.cas(AppState::Deploying, &app).await?;
                self.emit_state_changed(&app, AppState::Deploying, AppState::Created)
                    .await;
                Err(cause)
            }
        }
    }

    /// Arranca una aplicación desplegada.
    ///
    /// STARTING se persiste antes de la petición; si el cluster no confirma
    /// dentro del límite, se devuelve un timeout y el estado queda en
    /// STARTING (marcarlo FAILED sería prematuro: el job puede seguir
    /// inicializándose y la reconciliación lo observará después).
    pub async fn start_up(&self, app_id: &ApplicationId) -> Result<AppState> {
        let _permit = self.gate.acquire(app_id, "start")?;
        let mut app = self.load(app_id).await?;

        if app.state != AppState::Deployed {
            return Err(DomainError::InvalidStateTransition {
                from: app.state,
                to: AppState::Starting,
            });
        }
        let handle =
            app.cluster_handle
                .clone()
                .ok_or_else(|| DomainError::InfrastructureError {
                    message: format!("application {} is DEPLOYED without a cluster handle", app.id),
                })?;

        app.mark_starting()?;
        self.cas(AppState::Deployed, &app).await?;
        self.emit_state_changed(&app, AppState::Deployed, AppState::Starting)
            .await;

        let client = self.clusters.for_namespace(&app.spec.namespace);
        if let Err(err) = client.start(&handle).await {
            if err.is_transient() {
                warn!(
                    app_id = %app.id,
                    error = %err,
                    "start request unconfirmed; leaving STARTING for reconciliation"
                );
                return Err(err.into());
            }
            let cause: DomainError = err.into();
            warn!(app_id = %app.id, error = %cause, "cluster rejected start");
            app.mark_failed(cause.to_string())?;
            self.cas(AppState::Starting, &app).await?;
            self.emit_state_changed(&app, AppState::Starting, AppState::Failed)
                .await;
            return Err(cause);
        }

        let deadline = Instant::now() + self.config.start_confirm_timeout;
        loop {
            match client.query_by_handle(&handle).await {
                Ok(ClusterJobStatus::Running) => {
                    app.mark_running()?;
                    self.cas(AppState::Starting, &app).await?;
                    info!(app_id = %app.id, handle = %handle, "application running");
                    self.emit_state_changed(&app, AppState::Starting, AppState::Running)
                        .await;
                    return Ok(AppState::Running);
                }
                Ok(status @ (ClusterJobStatus::Stopped | ClusterJobStatus::NotFound)) => {
                    let message = format!("cluster reported {:?} during start", status);
                    warn!(app_id = %app.id, %message, "start failed");
                    app.mark_failed(message.clone())?;
                    self.cas(AppState::Starting, &app).await?;
                    self.emit_state_changed(&app, AppState::Starting, AppState::Failed)
                        .await;
                    return Err(DomainError::ClusterRejected { message });
                }
                Err(err) if err.is_transient() => {
                    warn!(app_id = %app.id, error = %err, "start confirmation probe failed");
                }
                Err(err) => {
                    let cause: DomainError = err.into();
                    app.mark_failed(cause.to_string())?;
                    self.cas(AppState::Starting, &app).await?;
                    self.emit_state_changed(&app, AppState::Starting, AppState::Failed)
                        .await;
                    return Err(cause);
                }
            }

            if Instant::now() >= deadline {
                return Err(DomainError::OperationTimeout {
                    operation: "startUp".into(),
                    waited_ms: self.config.start_confirm_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.start_poll_interval).await;
        }
    }

    /// Cancela una aplicación RUNNING/STARTING, con savepoint y drain opcionales
    pub async fn cancel(
        &self,
        app_id: &ApplicationId,
        savepoint_path: Option<String>,
        drain: Option<Duration>,
    ) -> Result<AppState> {
        let _permit = self.gate.acquire(app_id, "cancel")?;
        self.canceller.execute(app_id, savepoint_path, drain).await
    }

    /// Comprueba la existencia de un nombre en un namespace del cluster
    pub async fn check_exists(&self, name: &str, namespace: &Namespace) -> Result<ExistenceState> {
        self.resolver.check_exists(name, namespace).await
    }

    /// Estado persistido actual
    pub async fn get_state(&self, app_id: &ApplicationId) -> Result<AppState> {
        Ok(self.load(app_id).await?.state)
    }

    async fn load(&self, app_id: &ApplicationId) -> Result<Application> {
        self.repository
            .find_by_id(app_id)
            .await?
            .ok_or_else(|| DomainError::ApplicationNotFound {
                app_id: app_id.clone(),
            })
    }

    async fn cas(&self, expected: AppState, app: &Application) -> Result<()> {
        if self
            .repository
            .compare_and_set_state(expected, app)
            .await?
        {
            Ok(())
        } else {
            Err(DomainError::ConcurrentStateChange {
                app_id: app.id.clone(),
            })
        }
    }

    async fn emit_state_changed(&self, app: &Application, old: AppState, new: AppState) {
        self.emit(DomainEvent::ApplicationStateChanged {
            app_id: app.id.clone(),
            old_state: old,
            new_state: new,
            occurred_at: Utc::now(),
        })
        .await;
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.event_bus.publish(&event).await {
            error!("Failed to publish {} event: {}", event.kind(), e);
        }
    }
}
