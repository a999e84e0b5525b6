//! REST Cluster Client
//!
//! Implementación de ClusterClient contra el gateway REST del resource
//! manager. Todas las llamadas llevan el timeout configurado; los errores de
//! transporte se distinguen de los rechazos del gateway para que el
//! orquestador pueda tratar lo ambiguo como ambiguo.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use streamops_domain::cluster::{
    ClusterBackend, ClusterClient, ClusterError, ClusterJobStatus, RemoteApplication, StopOutcome,
    SubmissionDescriptor,
};
use streamops_domain::shared_kernel::{ClusterHandle, DomainError, Namespace};
use tracing::debug;

/// Configuración del gateway REST
#[derive(Debug, Clone)]
pub struct RestClusterConfig {
    /// URL base del gateway, p. ej. `http://cluster-gw:8088`
    pub base_url: String,
    /// Timeout por petición
    pub request_timeout: Duration,
}

impl RestClusterConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

pub struct RestClusterClient {
    config: RestClusterConfig,
    http: reqwest::Client,
}

impl RestClusterClient {
    pub fn new(config: RestClusterConfig) -> std::result::Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn transport_error(&self, err: reqwest::Error) -> ClusterError {
        if err.is_timeout() {
            ClusterError::Timeout(self.config.request_timeout)
        } else if err.is_decode() {
            ClusterError::Backend(format!("invalid gateway response: {}", err))
        } else {
            ClusterError::Unreachable(err.to_string())
        }
    }

    async fn rejection(response: reqwest::Response) -> ClusterError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            ClusterError::Rejected(format!("{}: {}", status, body))
        } else {
            ClusterError::Backend(format!("{}: {}", status, body))
        }
    }
}

// ============================================================================
// Wire DTOs
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    name: &'a str,
    artifact: &'a str,
    parallelism: u32,
    task_slots: u32,
    memory_mb: u64,
    engine_params: &'a HashMap<String, String>,
    epoch: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    handle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobSummary {
    handle: String,
    status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest<'a> {
    savepoint_path: Option<&'a str>,
    drain_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopResponse {
    outcome: String,
    savepoint: Option<String>,
}

fn parse_status(raw: &str) -> std::result::Result<ClusterJobStatus, ClusterError> {
    match raw {
        "RUNNING" | "RESTARTING" => Ok(ClusterJobStatus::Running),
        "STOPPED" | "FINISHED" | "FAILED" | "CANCELED" | "CANCELLED" => {
            Ok(ClusterJobStatus::Stopped)
        }
        other => Err(ClusterError::Backend(format!(
            "unknown job status reported by gateway: {}",
            other
        ))),
    }
}

#[async_trait]
impl ClusterClient for RestClusterClient {
    fn backend(&self) -> ClusterBackend {
        ClusterBackend::Rest
    }

    async fn submit(
        &self,
        descriptor: &SubmissionDescriptor,
    ) -> std::result::Result<ClusterHandle, ClusterError> {
        let url = self.url(&format!(
            "/v1/namespaces/{}/jobs",
            descriptor.namespace.as_str()
        ));
        let body = SubmitRequest {
            name: &descriptor.name,
            artifact: &descriptor.artifact,
            parallelism: descriptor.resources.parallelism,
            task_slots: descriptor.resources.task_slots,
            memory_mb: descriptor.resources.memory_mb,
            engine_params: &descriptor.engine_params,
            epoch: descriptor.epoch,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let accepted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        debug!(handle = %accepted.handle, name = %descriptor.name, "submission accepted by gateway");
        Ok(ClusterHandle::new(accepted.handle))
    }

    async fn start(&self, handle: &ClusterHandle) -> std::result::Result<(), ClusterError> {
        let url = self.url(&format!("/v1/jobs/{}/start", handle.as_str()));
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }

    async fn query_by_handle(
        &self,
        handle: &ClusterHandle,
    ) -> std::result::Result<ClusterJobStatus, ClusterError> {
        let url = self.url(&format!("/v1/jobs/{}", handle.as_str()));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ClusterJobStatus::NotFound);
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let status: JobStatusResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        parse_status(&status.status)
    }

    async fn query_by_name(
        &self,
        name: &str,
        namespace: &Namespace,
    ) -> std::result::Result<Option<RemoteApplication>, ClusterError> {
        let url = self.url(&format!("/v1/namespaces/{}/jobs", namespace.as_str()));
        let response = self
            .http
            .get(&url)
            .query(&[("name", name)])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let jobs: Vec<JobSummary> = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        let Some(job) = jobs.into_iter().next() else {
            return Ok(None);
        };

        Ok(Some(RemoteApplication {
            handle: ClusterHandle::new(job.handle),
            status: parse_status(&job.status)?,
        }))
    }

    async fn request_stop(
        &self,
        handle: &ClusterHandle,
        savepoint_path: Option<&str>,
        drain: Option<Duration>,
    ) -> std::result::Result<StopOutcome, ClusterError> {
        let url = self.url(&format!("/v1/jobs/{}/stop", handle.as_str()));
        let body = StopRequest {
            savepoint_path,
            drain_timeout_ms: drain.map(|d| d.as_millis() as u64),
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(StopOutcome::NotFound);
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let stop: StopResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        match stop.outcome.as_str() {
            "STOPPED" => Ok(StopOutcome::Stopped {
                savepoint: stop.savepoint,
            }),
            "ACCEPTED" => Ok(StopOutcome::Accepted),
            "NOT_FOUND" => Ok(StopOutcome::NotFound),
            other => Err(ClusterError::Backend(format!(
                "unknown stop outcome reported by gateway: {}",
                other
            ))),
        }
    }

    async fn force_stop(
        &self,
        handle: &ClusterHandle,
    ) -> std::result::Result<StopOutcome, ClusterError> {
        let url = self.url(&format!("/v1/jobs/{}", handle.as_str()));
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(StopOutcome::NotFound);
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(StopOutcome::Stopped { savepoint: None })
    }
}
