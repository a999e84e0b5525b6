//! State Reconciler
//!
//! Contrasta periódicamente el estado persistido de las aplicaciones en
//! estados con presencia esperada en el cluster (DEPLOYING/STARTING/RUNNING/
//! CANCELLING) contra lo que el resource manager reporta de verdad, y aplica
//! las transiciones que faltan. Es el mecanismo que mantiene la intención
//! local eventualmente consistente con el cluster; las transiciones
//! optimistas de deploy/start/cancel dependen de él.

use crate::cluster_registry::ClusterRegistry;
use crate::ops_gate::OperationGate;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use streamops_domain::apps::{Application, ApplicationRepository};
use streamops_domain::cluster::ClusterJobStatus;
use streamops_domain::event_bus::EventBus;
use streamops_domain::events::DomainEvent;
use streamops_domain::shared_kernel::{AppState, DomainError, Result};
use tracing::{debug, error, info, warn};

/// Configuración del barrido de reconciliación
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Intervalo entre barridos
    pub interval: Duration,
    /// Barrido habilitado
    pub enabled: bool,
    /// Margen antes de revertir un DEPLOYING sin handle a CREATED
    pub stale_deploy_grace: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            enabled: true,
            stale_deploy_grace: Duration::from_secs(300),
        }
    }
}

impl ReconcilerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let interval_secs = std::env::var("STREAMOPS_RECONCILE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        let enabled = std::env::var("STREAMOPS_RECONCILE_ENABLED")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(true);

        let grace_secs = std::env::var("STREAMOPS_STALE_DEPLOY_GRACE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(300);

        Self {
            interval: Duration::from_secs(interval_secs),
            enabled,
            stale_deploy_grace: Duration::from_secs(grace_secs),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Resultado de un barrido
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Aplicaciones examinadas
    pub examined: usize,
    /// Transiciones aplicadas
    pub transitioned: usize,
    /// Marcadas LOST
    pub lost: usize,
    /// Cancelaciones confirmadas
    pub cancelled: usize,
    /// Marcadas FAILED
    pub failed: usize,
    /// Arranques confirmados tarde
    pub confirmed_running: usize,
    /// DEPLOYING obsoletos revertidos a CREATED
    pub reverted: usize,
    /// Saltadas por operación en vuelo
    pub skipped_busy: usize,
    /// Saltadas por cluster inaccesible
    pub skipped_unreachable: usize,
}

pub struct StateReconciler {
    repository: Arc<dyn ApplicationRepository>,
    clusters: Arc<ClusterRegistry>,
    event_bus: Arc<dyn EventBus>,
    gate: Arc<OperationGate>,
    config: ReconcilerConfig,
}

impl StateReconciler {
    pub fn new(
        repository: Arc<dyn ApplicationRepository>,
        clusters: Arc<ClusterRegistry>,
        event_bus: Arc<dyn EventBus>,
        gate: Arc<OperationGate>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            repository,
            clusters,
            event_bus,
            gate,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Ejecuta un barrido completo.
    ///
    /// Idempotente: repetirlo contra un cluster sin cambios no produce
    /// transiciones adicionales.
    pub async fn run_once(&self) -> Result<ReconciliationReport> {
        let tracked = self
            .repository
            .find_by_states(&[
                AppState::Deploying,
                AppState::Starting,
                AppState::Running,
                AppState::Cancelling,
            ])
            .await?;

        let mut report = ReconciliationReport::default();
        for snapshot in tracked {
            report.examined += 1;

            let permit = match self.gate.acquire(&snapshot.id, "reconcile") {
                Ok(permit) => permit,
                Err(DomainError::OperationInFlight { .. }) => {
                    report.skipped_busy += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            // Se recarga bajo el permiso: la foto del listado puede ser vieja
            let Some(app) = self.repository.find_by_id(&snapshot.id).await? else {
                continue;
            };
            if !app.state.is_tracked() {
                continue;
            }

            if let Err(err) = self.reconcile_one(app, &mut report).await {
                warn!(app_id = %snapshot.id, error = %err, "reconciliation of application failed");
            }
            drop(permit);
        }

        Ok(report)
    }

    async fn reconcile_one(
        &self,
        mut app: Application,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        let Some(handle) = app.cluster_handle.clone() else {
            return self.reconcile_handleless(app, report).await;
        };

        let client = self.clusters.for_namespace(&app.spec.namespace);
        let status = match client.query_by_handle(&handle).await {
            Ok(status) => status,
            Err(err) if err.is_transient() => {
                // LOST solo se concluye de un NOT_FOUND positivo; un error de
                // transporte deja el estado intacto hasta el siguiente barrido
                debug!(app_id = %app.id, error = %err, "cluster unreachable; leaving state untouched");
                report.skipped_unreachable += 1;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match (app.state, status) {
            // Sin deriva
            (AppState::Running, ClusterJobStatus::Running)
            | (AppState::Cancelling, ClusterJobStatus::Running) => {}

            // Confirmación tardía de un arranque
            (AppState::Starting, ClusterJobStatus::Running) => {
                app.mark_running()?;
                self.persist(AppState::Starting, &app, report).await?;
                report.confirmed_running += 1;
                info!(app_id = %app.id, "late start confirmation observed");
                self.emit_state_changed(&app, AppState::Starting, AppState::Running)
                    .await;
            }

            // Parada confirmada de una cancelación en curso
            (AppState::Cancelling, ClusterJobStatus::Stopped) => {
                app.mark_cancelled(None)?;
                self.persist(AppState::Cancelling, &app, report).await?;
                report.cancelled += 1;
                info!(app_id = %app.id, "cancellation confirmed by reconciliation");
                self.emit_state_changed(&app, AppState::Cancelling, AppState::Cancelled)
                    .await;
            }

            // La parada se pidió y la instancia ya no existe: se completó
            (AppState::Cancelling, ClusterJobStatus::NotFound) => {
                app.mark_cancelled(None)?;
                self.persist(AppState::Cancelling, &app, report).await?;
                report.cancelled += 1;
                info!(app_id = %app.id, "cancelled instance purged from cluster");
                self.emit_state_changed(&app, AppState::Cancelling, AppState::Cancelled)
                    .await;
            }

            // Parada sin intervención nuestra
            (prior @ (AppState::Starting | AppState::Running), ClusterJobStatus::Stopped) => {
                app.mark_failed("instance stopped outside of orchestration")?;
                self.persist(prior, &app, report).await?;
                report.failed += 1;
                warn!(app_id = %app.id, "instance stopped outside of orchestration");
                self.emit_state_changed(&app, prior, AppState::Failed).await;
            }

            // DEPLOYING con handle no ocurre (el handle se registra al pasar
            // a DEPLOYED); se deja constancia y se ignora
            (AppState::Deploying, _) => {
                debug!(app_id = %app.id, "DEPLOYING record with a handle; skipping");
            }

            // El handle desapareció sin parada ordenada
            (prior @ (AppState::Starting | AppState::Running), ClusterJobStatus::NotFound) => {
                let lost_handle = app.mark_lost()?;
                self.persist(prior, &app, report).await?;
                report.lost += 1;
                warn!(
                    app_id = %app.id,
                    last_handle = lost_handle.as_ref().map(|h| h.as_str()).unwrap_or("-"),
                    "cluster handle vanished; application marked LOST"
                );
                self.emit_state_changed(&app, prior, AppState::Lost).await;
                self.emit(DomainEvent::ApplicationLost {
                    app_id: app.id.clone(),
                    last_handle: lost_handle,
                    occurred_at: Utc::now(),
                })
                .await;
            }

            // Estados no rastreados no llegan aquí (filtrados en run_once)
            (state, status) => {
                debug!(app_id = %app.id, %state, ?status, "nothing to reconcile");
            }
        }

        Ok(())
    }

    /// Registros rastreados sin handle: o un DEPLOYING interrumpido antes de
    /// registrar el resultado de la submission, o un invariante roto.
    async fn reconcile_handleless(
        &self,
        mut app: Application,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        if app.state == AppState::Deploying {
            let age = Utc::now()
                .signed_duration_since(app.state_changed_at)
                .to_std()
                .unwrap_or_default();
            if age < self.config.stale_deploy_grace {
                // Submission posiblemente aún en vuelo en otro proceso
                return Ok(());
            }
            app.revert_to_created("deployment interrupted before submission completed")?;
            self.persist(AppState::Deploying, &app, report).await?;
            report.reverted += 1;
            warn!(app_id = %app.id, "stale DEPLOYING reverted to CREATED");
            self.emit_state_changed(&app, AppState::Deploying, AppState::Created)
                .await;
            return Ok(());
        }

        // STARTING/RUNNING/CANCELLING sin handle violan el invariante
        let prior = app.state;
        app.mark_lost()?;
        self.persist(prior, &app, report).await?;
        report.lost += 1;
        warn!(app_id = %app.id, state = %prior, "tracked state without a handle; marked LOST");
        self.emit_state_changed(&app, prior, AppState::Lost).await;
        Ok(())
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

    async fn persist(
        &self,
        expected: AppState,
        app: &Application,
        report: &mut ReconciliationReport,
    ) -> Result<()> {
        if self
            .repository
            .compare_and_set_state(expected, app)
            .await?
        {
            report.transitioned += 1;
            Ok(())
        } else {
            Err(DomainError::ConcurrentStateChange {
                app_id: app.id.clone(),
            })
        }
    }

    /// Start the background reconciliation loop
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let reconciler = self.clone();

        tokio::spawn(async move {
            if !reconciler.config.enabled {
                warn!("State reconciliation is disabled. Background task will not run.");
                return;
            }

            info!(
                "Starting state reconciliation task (interval: {:?})",
                reconciler.config.interval
            );

            let mut interval = tokio::time::interval(reconciler.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // El primer tick es inmediato

            loop {
                interval.tick().await;
                match reconciler.run_once().await {
                    Ok(report) if report.transitioned > 0 => {
                        info!(
                            examined = report.examined,
                            transitioned = report.transitioned,
                            lost = report.lost,
                            cancelled = report.cancelled,
                            failed = report.failed,
                            "reconciliation sweep applied transitions"
                        );
                    }
                    Ok(report) => {
                        debug!(examined = report.examined, "reconciliation sweep: no drift");
                    }
                    Err(err) => {
                        error!("Reconciliation sweep failed: {}", err);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        created_app, deployed_app, running_app, CapturingEventBus, MockRepository, ScriptedCluster,
    };
    use streamops_domain::cluster::ClusterError;

    struct Fixture {
        reconciler: StateReconciler,
        repository: Arc<MockRepository>,
        cluster: Arc<ScriptedCluster>,
        gate: Arc<OperationGate>,
        bus: Arc<CapturingEventBus>,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(MockRepository::default());
        let cluster = Arc::new(ScriptedCluster::default());
        let registry = Arc::new(ClusterRegistry::new(cluster.clone()));
        let gate = OperationGate::new();
        let bus = Arc::new(CapturingEventBus::default());
        let reconciler = StateReconciler::new(
            repository.clone(),
            registry,
            bus.clone(),
            gate.clone(),
            ReconcilerConfig::default(),
        );
        Fixture {
            reconciler,
            repository,
            cluster,
            gate,
            bus,
        }
    }

    fn starting_app(name: &str, handle: &str) -> streamops_domain::apps::Application {
        let mut app = deployed_app(name, "ns1", handle);
        app.mark_starting().unwrap();
        app
    }

    #[tokio::test]
    async fn test_vanished_handle_marks_lost() {
        let f = fixture();
        let app = running_app("job1", "ns1", "h1");
        let app_id = app.id.clone();
        f.repository.seed(app);
        f.cluster.set_status_default(Ok(ClusterJobStatus::NotFound));

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.lost, 1);

        let stored = f.repository.get(&app_id);
        assert_eq!(stored.state, AppState::Lost);
        assert_eq!(stored.cluster_handle, None);
        assert!(f
            .bus
            .events()
            .iter()
            .any(|e| matches!(e, DomainEvent::ApplicationLost { .. })));
    }

    #[tokio::test]
    async fn test_late_start_confirmation() {
        let f = fixture();
        let app = starting_app("job1", "h1");
        let app_id = app.id.clone();
        f.repository.seed(app);
        f.cluster.set_status_default(Ok(ClusterJobStatus::Running));

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.confirmed_running, 1);
        assert_eq!(f.repository.get(&app_id).state, AppState::Running);
    }

    #[tokio::test]
    async fn test_cancelling_confirmed_on_stopped_or_purged() {
        let f = fixture();
        let mut app = running_app("job1", "ns1", "h1");
        app.mark_cancelling().unwrap();
        let app_id = app.id.clone();
        f.repository.seed(app);
        f.cluster.set_status_default(Ok(ClusterJobStatus::NotFound));

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.lost, 0);

        let stored = f.repository.get(&app_id);
        assert_eq!(stored.state, AppState::Cancelled);
        assert_eq!(stored.cluster_handle, None);
    }

    #[tokio::test]
    async fn test_stopped_outside_orchestration_marks_failed() {
        let f = fixture();
        let app = running_app("job1", "ns1", "h1");
        let app_id = app.id.clone();
        f.repository.seed(app);
        f.cluster.set_status_default(Ok(ClusterJobStatus::Stopped));

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let stored = f.repository.get(&app_id);
        assert_eq!(stored.state, AppState::Failed);
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn test_transport_errors_never_transition() {
        let f = fixture();
        let app = running_app("job1", "ns1", "h1");
        let app_id = app.id.clone();
        f.repository.seed(app);
        f.cluster
            .set_status_default(Err(ClusterError::Unreachable("gateway down".into())));

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.skipped_unreachable, 1);
        assert_eq!(report.transitioned, 0);
        assert_eq!(f.repository.get(&app_id).state, AppState::Running);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let f = fixture();
        let app = starting_app("job1", "h1");
        f.repository.seed(app);
        f.cluster.set_status_default(Ok(ClusterJobStatus::Running));

        let first = f.reconciler.run_once().await.unwrap();
        assert_eq!(first.transitioned, 1);

        // Cluster sin cambios: el segundo barrido no transiciona nada
        let second = f.reconciler.run_once().await.unwrap();
        assert_eq!(second.transitioned, 0);
        assert_eq!(second.examined, 1);
    }

    #[tokio::test]
    async fn test_busy_records_are_skipped() {
        let f = fixture();
        let app = running_app("job1", "ns1", "h1");
        let app_id = app.id.clone();
        f.repository.seed(app);
        f.cluster.set_status_default(Ok(ClusterJobStatus::NotFound));

        let _held = f.gate.acquire(&app_id, "cancel").unwrap();
        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.skipped_busy, 1);
        assert_eq!(f.repository.get(&app_id).state, AppState::Running);
    }

    #[tokio::test]
    async fn test_stale_deploying_reverts_to_created() {
        let f = fixture();
        let mut app = created_app("job1", "ns1");
        app.mark_deploying().unwrap();
        // Simula un deploy interrumpido hace más del margen configurado
        app.state_changed_at = Utc::now() - chrono::Duration::seconds(600);
        let app_id = app.id.clone();
        f.repository.seed(app);

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.reverted, 1);
        assert_eq!(f.repository.get(&app_id).state, AppState::Created);
    }

    #[tokio::test]
    async fn test_fresh_deploying_is_left_alone() {
        let f = fixture();
        let mut app = created_app("job1", "ns1");
        app.mark_deploying().unwrap();
        let app_id = app.id.clone();
        f.repository.seed(app);

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.reverted, 0);
        assert_eq!(report.transitioned, 0);
        assert_eq!(f.repository.get(&app_id).state, AppState::Deploying);
    }

    #[tokio::test]
    async fn test_tracked_state_without_handle_is_repaired() {
        let f = fixture();
        let mut app = running_app("job1", "ns1", "h1");
        // Registro corrupto: RUNNING sin handle
        app.cluster_handle = None;
        let app_id = app.id.clone();
        f.repository.seed(app);

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.lost, 1);
        assert_eq!(f.repository.get(&app_id).state, AppState::Lost);
    }
}
