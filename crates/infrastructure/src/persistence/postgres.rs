//! PostgreSQL Application Repository
//!
//! Persistencia de aplicaciones sobre PostgreSQL. El spec declarado se
//! guarda como JSONB; el estado como string para poder indexarlo y hacer el
//! compare-and-set en una única sentencia UPDATE.

use sqlx::{postgres::PgPool, Row};
use streamops_domain::apps::{AppSpec, Application, ApplicationRepository};
use streamops_domain::shared_kernel::{
    AppState, ApplicationId, ClusterHandle, DomainError, Namespace, Result,
};

use super::DatabaseConfig;

/// PostgreSQL Application Repository
#[derive(Clone)]
pub struct PostgresApplicationRepository {
    pool: PgPool,
}

impl PostgresApplicationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to connect to database: {}", e),
            })?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                namespace TEXT NOT NULL,
                spec JSONB NOT NULL,
                state TEXT NOT NULL,
                cluster_handle TEXT,
                last_handle TEXT,
                deploy_epoch INT NOT NULL DEFAULT 0,
                savepoint_path TEXT,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                last_deployed_at TIMESTAMPTZ,
                state_changed_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::InfrastructureError {
            message: format!("Failed to create applications table: {}", e),
        })?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_applications_name_namespace \
             ON applications(name, namespace);",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::InfrastructureError {
            message: format!("Failed to create applications name index: {}", e),
        })?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_applications_state ON applications(state);")
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to create applications state index: {}", e),
            })?;

        Ok(())
    }

    async fn upsert(&self, app: &Application) -> Result<()> {
        let spec_json =
            serde_json::to_value(&app.spec).map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to serialize application spec: {}", e),
            })?;

        sqlx::query(
            r#"
            INSERT INTO applications (
                id, name, namespace, spec, state, cluster_handle, last_handle, deploy_epoch,
                savepoint_path, error_message, created_at, last_deployed_at, state_changed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                namespace = EXCLUDED.namespace,
                spec = EXCLUDED.spec,
                state = EXCLUDED.state,
                cluster_handle = EXCLUDED.cluster_handle,
                last_handle = EXCLUDED.last_handle,
                deploy_epoch = EXCLUDED.deploy_epoch,
                savepoint_path = EXCLUDED.savepoint_path,
                error_message = EXCLUDED.error_message,
                last_deployed_at = EXCLUDED.last_deployed_at,
                state_changed_at = EXCLUDED.state_changed_at
            "#,
        )
        .bind(app.id.0)
        .bind(&app.spec.name)
        .bind(app.spec.namespace.as_str())
        .bind(spec_json)
        .bind(app.state.to_string())
        .bind(app.cluster_handle.as_ref().map(|h| h.as_str()))
        .bind(app.last_handle.as_ref().map(|h| h.as_str()))
        .bind(app.deploy_epoch as i32)
        .bind(app.savepoint_path.as_deref())
        .bind(app.error_message.as_deref())
        .bind(app.created_at)
        .bind(app.last_deployed_at)
        .bind(app.state_changed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::InfrastructureError {
            message: format!("Failed to persist application: {}", e),
        })?;

        Ok(())
    }
}

fn map_row_to_application(row: sqlx::postgres::PgRow) -> Result<Application> {
    let id: uuid::Uuid = row.get("id");
    let spec_json: serde_json::Value = row.get("spec");
    let state_str: String = row.get("state");
    let cluster_handle: Option<String> = row.get("cluster_handle");
    let last_handle: Option<String> = row.get("last_handle");
    let deploy_epoch: i32 = row.get("deploy_epoch");
    let savepoint_path: Option<String> = row.get("savepoint_path");
    let error_message: Option<String> = row.get("error_message");
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
    let last_deployed_at: Option<chrono::DateTime<chrono::Utc>> = row.get("last_deployed_at");
    let state_changed_at: chrono::DateTime<chrono::Utc> = row.get("state_changed_at");

    let spec: AppSpec =
        serde_json::from_value(spec_json).map_err(|e| DomainError::InfrastructureError {
            message: format!("Failed to deserialize application spec: {}", e),
        })?;

    let state = AppState::parse(&state_str).ok_or_else(|| DomainError::InfrastructureError {
        message: format!("Unknown application state in database: {}", state_str),
    })?;

    Ok(Application {
        id: ApplicationId(id),
        spec,
        state,
        cluster_handle: cluster_handle.map(ClusterHandle::new),
        last_handle: last_handle.map(ClusterHandle::new),
        deploy_epoch: deploy_epoch as u32,
        savepoint_path,
        error_message,
        created_at,
        last_deployed_at,
        state_changed_at,
    })
}

#[async_trait::async_trait]
impl ApplicationRepository for PostgresApplicationRepository {
    async fn save(&self, app: &Application) -> Result<()> {
        self.upsert(app).await
    }

    async fn find_by_id(&self, id: &ApplicationId) -> Result<Option<Application>> {
        let row = sqlx::query("SELECT * FROM applications WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to load application: {}", e),
            })?;

        row.map(map_row_to_application).transpose()
    }

    async fn find_by_name(&self, name: &str, namespace: &Namespace) -> Result<Option<Application>> {
        let row = sqlx::query("SELECT * FROM applications WHERE name = $1 AND namespace = $2")
            .bind(name)
            .bind(namespace.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to load application by name: {}", e),
            })?;

        row.map(map_row_to_application).transpose()
    }

    async fn find_by_states(&self, states: &[AppState]) -> Result<Vec<Application>> {
        let state_names: Vec<String> = states.iter().map(|s| s.to_string()).collect();
        let rows = sqlx::query("SELECT * FROM applications WHERE state = ANY($1)")
            .bind(&state_names)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to list applications by state: {}", e),
            })?;

        rows.into_iter().map(map_row_to_application).collect()
    }

    async fn update(&self, app: &Application) -> Result<()> {
        self.upsert(app).await
    }

    async fn compare_and_set_state(&self, expected: AppState, app: &Application) -> Result<bool> {
        let spec_json =
            serde_json::to_value(&app.spec).map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to serialize application spec: {}", e),
            })?;

        let result = sqlx::query(
            r#"
            UPDATE applications SET
                spec = $3,
                state = $4,
                cluster_handle = $5,
                last_handle = $6,
                deploy_epoch = $7,
                savepoint_path = $8,
                error_message = $9,
                last_deployed_at = $10,
                state_changed_at = $11
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(app.id.0)
        .bind(expected.to_string())
        .bind(spec_json)
        .bind(app.state.to_string())
        .bind(app.cluster_handle.as_ref().map(|h| h.as_str()))
        .bind(app.last_handle.as_ref().map(|h| h.as_str()))
        .bind(app.deploy_epoch as i32)
        .bind(app.savepoint_path.as_deref())
        .bind(app.error_message.as_deref())
        .bind(app.last_deployed_at)
        .bind(app.state_changed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::InfrastructureError {
            message: format!("Failed to compare-and-set application state: {}", e),
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &ApplicationId) -> Result<()> {
        sqlx::query("DELETE FROM applications WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::InfrastructureError {
                message: format!("Failed to delete application: {}", e),
            })?;

        Ok(())
    }
}
