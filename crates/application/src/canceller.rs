//! Savepoint-Aware Canceller
//!
//! Parada ordenada de aplicaciones RUNNING/STARTING, con savepoint y drain
//! opcionales y escalado a terminación forzosa al expirar el drain. La
//! cancelación nunca se presume exitosa: sin confirmación del cluster la
//! aplicación queda en CANCELLING y la reconciliación la resuelve después.

use crate::cluster_registry::ClusterRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use streamops_domain::apps::{Application, ApplicationRepository};
use streamops_domain::cluster::{ClusterClient, ClusterJobStatus, StopOutcome};
use streamops_domain::event_bus::EventBus;
use streamops_domain::events::DomainEvent;
use streamops_domain::shared_kernel::{
    AppState, ApplicationId, ClusterHandle, DomainError, Result,
};
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct CancelConfig {
    /// Intervalo entre sondas de confirmación durante el drain
    pub confirm_poll_interval: Duration,
}

impl Default for CancelConfig {
    fn default() -> Self {
        Self {
            confirm_poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct SavepointCanceller {
    repository: Arc<dyn ApplicationRepository>,
    clusters: Arc<ClusterRegistry>,
    event_bus: Arc<dyn EventBus>,
    config: CancelConfig,
}

impl SavepointCanceller {
    pub fn new(
        repository: Arc<dyn ApplicationRepository>,
        clusters: Arc<ClusterRegistry>,
        event_bus: Arc<dyn EventBus>,
        config: CancelConfig,
    ) -> Self {
        Self {
            repository,
            clusters,
            event_bus,
            config,
        }
    }

    /// Ejecuta la cancelación. El caller debe sostener el permiso de la
    /// puerta de operaciones para este id.
    pub async fn execute(
        &self,
        app_id: &ApplicationId,
        savepoint_path: Option<String>,
        drain: Option<Duration>,
    ) -> Result<AppState> {
        let mut app = self
            .repository
            .find_by_id(app_id)
            .await?
            .ok_or_else(|| DomainError::ApplicationNotFound {
                app_id: app_id.clone(),
            })?;

        if !matches!(app.state, AppState::Running | AppState::Starting) {
            return Err(DomainError::InvalidStateTransition {
                from: app.state,
                to: AppState::Cancelling,
            });
        }

        let handle = app.cluster_handle.clone().ok_or_else(|| {
            DomainError::InfrastructureError {
                message: format!("application {} is {} without a cluster handle", app.id, app.state),
            }
        })?;

        // CANCELLING se persiste antes de hablar con el cluster para que la
        // intención sea visible a la reconciliación desde el primer momento.
        let prior_state = app.state;
        app.mark_cancelling()?;
        if !self
            .repository
            .compare_and_set_state(prior_state, &app)
            .await?
        {
            return Err(DomainError::ConcurrentStateChange {
                app_id: app.id.clone(),
            });
        }
        self.emit_state_changed(&app, prior_state, AppState::Cancelling)
            .await;

        info!(
            app_id = %app.id,
            handle = %handle,
            savepoint = savepoint_path.as_deref().unwrap_or("-"),
            drain_ms = drain.map(|d| d.as_millis() as u64),
            "stop requested"
        );

        let client = self.clusters.for_namespace(&app.spec.namespace);
        let outcome = match client
            .request_stop(&handle, savepoint_path.as_deref(), drain)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    app_id = %app.id,
                    error = %err,
                    "stop request failed; leaving CANCELLING for reconciliation"
                );
                return Err(err.into());
            }
        };

        match outcome {
            StopOutcome::Stopped { savepoint } => {
                let recorded = savepoint.or(savepoint_path);
                self.confirm_cancelled(app, recorded).await
            }
            StopOutcome::NotFound => {
                // La instancia desapareció antes de que la parada llegase
                let lost_handle = app.mark_lost()?;
                if !self
                    .repository
                    .compare_and_set_state(AppState::Cancelling, &app)
                    .await?
                {
                    return Err(DomainError::ConcurrentStateChange {
                        app_id: app.id.clone(),
                    });
                }
                warn!(
                    app_id = %app.id,
                    last_handle = lost_handle.as_ref().map(|h| h.as_str()).unwrap_or("-"),
                    "instance vanished before stop request landed"
                );
                self.emit_state_changed(&app, AppState::Cancelling, AppState::Lost)
                    .await;
                self.emit(DomainEvent::ApplicationLost {
                    app_id: app.id.clone(),
                    last_handle: lost_handle,
                    occurred_at: Utc::now(),
                })
                .await;
                Ok(AppState::Lost)
            }
            StopOutcome::Accepted => {
                self.await_confirmation(app, handle, client, savepoint_path, drain)
                    .await
            }
        }
    }

    /// Parada iniciada pero sin confirmar: con drain, sondea hasta el límite
    /// y escala a terminación forzosa; sin drain, una única sonda.
    async fn await_confirmation(
        &self,
        app: Application,
        handle: ClusterHandle,
        client: Arc<dyn ClusterClient>,
        savepoint_path: Option<String>,
        drain: Option<Duration>,
    ) -> Result<AppState> {
        let Some(bound) = drain else {
            return match client.query_by_handle(&handle).await {
                Ok(ClusterJobStatus::Stopped) | Ok(ClusterJobStatus::NotFound) => {
                    self.confirm_cancelled(app, savepoint_path).await
                }
                _ => {
                    info!(
                        app_id = %app.id,
                        "stop accepted but unconfirmed; reconciliation will complete it"
                    );
                    Ok(AppState::Cancelling)
                }
            };
        };

        let deadline = Instant::now() + bound;
        loop {
            match client.query_by_handle(&handle).await {
                Ok(ClusterJobStatus::Stopped) | Ok(ClusterJobStatus::NotFound) => {
                    return self.confirm_cancelled(app, savepoint_path).await;
                }
                Ok(ClusterJobStatus::Running) => {}
                Err(err) if err.is_transient() => {
                    warn!(app_id = %app.id, error = %err, "confirmation probe failed");
                }
                Err(err) => return Err(err.into()),
            }

            if Instant::now() >= deadline {
                warn!(
                    app_id = %app.id,
                    drain_ms = bound.as_millis() as u64,
                    "drain expired; escalating to forced termination"
                );
                return match client.force_stop(&handle).await {
                    // Parada forzosa: el savepoint solicitado ya no es fiable
                    Ok(StopOutcome::Stopped { .. }) | Ok(StopOutcome::NotFound) => {
                        self.confirm_cancelled(app, None).await
                    }
                    Ok(StopOutcome::Accepted) => Err(DomainError::OperationTimeout {
                        operation: "cancel".into(),
                        waited_ms: bound.as_millis() as u64,
                    }),
                    Err(err) => {
                        warn!(
                            app_id = %app.id,
                            error = %err,
                            "forced termination failed; leaving CANCELLING for reconciliation"
                        );
                        Err(err.into())
                    }
                };
            }

            tokio::time::sleep(self.config.confirm_poll_interval).await;
        }
    }

    async fn confirm_cancelled(
        &self,
        mut app: Application,
        savepoint: Option<String>,
    ) -> Result<AppState> {
        app.mark_cancelled(savepoint.clone())?;
        if !self
            .repository
            .compare_and_set_state(AppState::Cancelling, &app)
            .await?
        {
            return Err(DomainError::ConcurrentStateChange {
                app_id: app.id.clone(),
            });
        }

        info!(
            app_id = %app.id,
            savepoint = savepoint.as_deref().unwrap_or("-"),
            "cancellation confirmed"
        );
        self.emit_state_changed(&app, AppState::Cancelling, AppState::Cancelled)
            .await;
        if let Some(path) = savepoint {
            self.emit(DomainEvent::SavepointRecorded {
                app_id: app.id.clone(),
                path,
                occurred_at: Utc::now(),
            })
            .await;
        }
        Ok(AppState::Cancelled)
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
