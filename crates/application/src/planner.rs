//! Deployment Planner
//!
//! Convierte la configuración declarada de una aplicación en un descriptor de
//! submission concreto. No toca estado de cluster: el orquestador decide si y
//! cuándo enviar el descriptor.

use chrono::Utc;
use std::path::{Path, PathBuf};
use streamops_domain::apps::Application;
use streamops_domain::cluster::SubmissionDescriptor;
use streamops_domain::shared_kernel::{DomainError, Result};
use tracing::info;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Directorio donde se versionan los backups de artefactos
    pub backup_dir: PathBuf,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./artifact-backups"),
        }
    }
}

pub struct DeploymentPlanner {
    config: PlannerConfig,
}

impl DeploymentPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Construye el descriptor de submission para `app`.
    ///
    /// Si `backup_previous` está activo y la aplicación ya fue desplegada,
    /// copia primero el artefacto a una ubicación versionada; un fallo en la
    /// copia aborta el plan y el deploy no continúa.
    pub async fn plan(
        &self,
        app: &Application,
        backup_previous: bool,
    ) -> Result<SubmissionDescriptor> {
        let artifact = app
            .spec
            .artifact
            .clone()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| DomainError::IncompleteConfiguration {
                message: format!("application '{}' has no artifact reference", app.spec.name),
            })?;

        let resources =
            app.spec
                .resources
                .clone()
                .ok_or_else(|| DomainError::IncompleteConfiguration {
                    message: format!("application '{}' has no resource requests", app.spec.name),
                })?;

        if backup_previous && app.last_deployed_at.is_some() {
            self.backup_artifact(app, &artifact).await?;
        }

        Ok(SubmissionDescriptor {
            app_id: app.id.clone(),
            name: app.spec.name.clone(),
            namespace: app.spec.namespace.clone(),
            artifact,
            resources,
            engine_params: app.spec.engine_params.clone(),
            epoch: app.deploy_epoch + 1,
        })
    }

    async fn backup_artifact(&self, app: &Application, artifact: &str) -> Result<()> {
        let source = Path::new(artifact);
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| app.spec.name.clone());

        tokio::fs::create_dir_all(&self.config.backup_dir)
            .await
            .map_err(|e| DomainError::ArtifactIo {
                message: format!(
                    "cannot create backup dir {}: {}",
                    self.config.backup_dir.display(),
                    e
                ),
            })?;

        let target = self.config.backup_dir.join(format!(
            "{}-epoch{}-{}-{}",
            app.spec.name,
            app.deploy_epoch,
            Utc::now().format("%Y%m%d%H%M%S"),
            file_name
        ));

        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| DomainError::ArtifactIo {
                message: format!("backup of {} to {} failed: {}", artifact, target.display(), e),
            })?;

        info!(
            app_id = %app.id,
            artifact,
            backup = %target.display(),
            "previous artifact backed up"
        );
        Ok(())
    }
}
