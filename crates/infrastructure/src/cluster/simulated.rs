//! Simulated Cluster Client
//!
//! Backend de cluster en memoria para tests y desarrollo local. Expone el
//! mismo contrato que los backends de producción, más mandos para provocar
//! rechazos, caídas de red y desapariciones de instancias.
//!
//! **IMPORTANT**: This is for TESTING and local development only.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamops_domain::cluster::{
    ClusterBackend, ClusterClient, ClusterError, ClusterJobStatus, RemoteApplication, StopOutcome,
    SubmissionDescriptor,
};
use streamops_domain::shared_kernel::{ClusterHandle, Namespace};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct SimulatedJob {
    name: String,
    namespace: Namespace,
    status: ClusterJobStatus,
}

/// Mandos de comportamiento del cluster simulado
#[derive(Debug, Clone)]
pub struct SimulatedBehavior {
    /// Rechazar todas las submissions
    pub reject_submissions: bool,
    /// Simular gateway caído en todas las llamadas
    pub unreachable: bool,
    /// Los arranques pasan el job a RUNNING inmediatamente
    pub auto_run_on_start: bool,
    /// Las paradas se confirman en la propia llamada; si no, devuelven ACCEPTED
    pub stop_synchronously: bool,
    /// Solo las consultas de estado fallan (API de tracking degradada)
    pub queries_unreachable: bool,
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self {
            reject_submissions: false,
            unreachable: false,
            auto_run_on_start: true,
            stop_synchronously: true,
            queries_unreachable: false,
        }
    }
}

#[derive(Clone)]
pub struct SimulatedClusterClient {
    jobs: Arc<RwLock<HashMap<String, SimulatedJob>>>,
    behavior: Arc<RwLock<SimulatedBehavior>>,
    handle_counter: Arc<AtomicU64>,
}

impl SimulatedClusterClient {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            behavior: Arc::new(RwLock::new(SimulatedBehavior::default())),
            handle_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn set_behavior(&self, behavior: SimulatedBehavior) {
        *self.behavior.write().await = behavior;
    }

    /// Hace desaparecer una instancia sin parada ordenada
    pub async fn vanish(&self, handle: &ClusterHandle) {
        self.jobs.write().await.remove(handle.as_str());
    }

    /// Fuerza el estado de una instancia
    pub async fn set_status(&self, handle: &ClusterHandle, status: ClusterJobStatus) {
        if let Some(job) = self.jobs.write().await.get_mut(handle.as_str()) {
            job.status = status;
        }
    }

    async fn fail_if_unreachable(&self) -> std::result::Result<(), ClusterError> {
        if self.behavior.read().await.unreachable {
            return Err(ClusterError::Unreachable(
                "simulated gateway is down".into(),
            ));
        }
        Ok(())
    }

    async fn fail_if_queries_unreachable(&self) -> std::result::Result<(), ClusterError> {
        self.fail_if_unreachable().await?;
        if self.behavior.read().await.queries_unreachable {
            return Err(ClusterError::Unreachable(
                "simulated tracking API is down".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SimulatedClusterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterClient for SimulatedClusterClient {
    fn backend(&self) -> ClusterBackend {
        ClusterBackend::Simulated
    }

    async fn submit(
        &self,
        descriptor: &SubmissionDescriptor,
    ) -> std::result::Result<ClusterHandle, ClusterError> {
        self.fail_if_unreachable().await?;
        if self.behavior.read().await.reject_submissions {
            return Err(ClusterError::Rejected(
                "simulated cluster rejects submissions".into(),
            ));
        }

        let handle = format!("sim-{}", self.handle_counter.fetch_add(1, Ordering::SeqCst));
        self.jobs.write().await.insert(
            handle.clone(),
            SimulatedJob {
                name: descriptor.name.clone(),
                namespace: descriptor.namespace.clone(),
                status: ClusterJobStatus::Stopped,
            },
        );
        debug!(handle, name = %descriptor.name, "simulated submission accepted");
        Ok(ClusterHandle::new(handle))
    }

    async fn start(&self, handle: &ClusterHandle) -> std::result::Result<(), ClusterError> {
        self.fail_if_unreachable().await?;
        let auto_run = self.behavior.read().await.auto_run_on_start;
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(handle.as_str()) else {
            return Err(ClusterError::Rejected(format!(
                "unknown handle: {}",
                handle
            )));
        };
        if auto_run {
            job.status = ClusterJobStatus::Running;
        }
        Ok(())
    }

    async fn query_by_handle(
        &self,
        handle: &ClusterHandle,
    ) -> std::result::Result<ClusterJobStatus, ClusterError> {
        self.fail_if_queries_unreachable().await?;
        let jobs = self.jobs.read().await;
        Ok(jobs
            .get(handle.as_str())
            .map(|job| job.status)
            .unwrap_or(ClusterJobStatus::NotFound))
    }

    async fn query_by_name(
        &self,
        name: &str,
        namespace: &Namespace,
    ) -> std::result::Result<Option<RemoteApplication>, ClusterError> {
        self.fail_if_queries_unreachable().await?;
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .find(|(_, job)| job.name == name && &job.namespace == namespace)
            .map(|(handle, job)| RemoteApplication {
                handle: ClusterHandle::new(handle.clone()),
                status: job.status,
            }))
    }

    async fn request_stop(
        &self,
        handle: &ClusterHandle,
        savepoint_path: Option<&str>,
        _drain: Option<Duration>,
    ) -> std::result::Result<StopOutcome, ClusterError> {
        self.fail_if_unreachable().await?;
        let synchronous = self.behavior.read().await.stop_synchronously;
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(handle.as_str()) else {
            return Ok(StopOutcome::NotFound);
        };

        if synchronous {
            job.status = ClusterJobStatus::Stopped;
            Ok(StopOutcome::Stopped {
                savepoint: savepoint_path.map(|s| s.to_string()),
            })
        } else {
            Ok(StopOutcome::Accepted)
        }
    }

    async fn force_stop(
        &self,
        handle: &ClusterHandle,
    ) -> std::result::Result<StopOutcome, ClusterError> {
        self.fail_if_unreachable().await?;
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(handle.as_str()) else {
            return Ok(StopOutcome::NotFound);
        };
        job.status = ClusterJobStatus::Stopped;
        Ok(StopOutcome::Stopped { savepoint: None })
    }
}
