// In-memory Repositories
// Implementación en memoria del repositorio de aplicaciones

use std::collections::HashMap;
use std::sync::Arc;
use streamops_domain::apps::{Application, ApplicationRepository};
use streamops_domain::shared_kernel::{AppState, ApplicationId, Namespace, Result};
use tokio::sync::RwLock;

/// Repositorio en memoria para Applications
///
/// El CAS se resuelve bajo el write lock, con la misma semántica que el
/// adaptador Postgres: el registro completo se persiste solo si el estado
/// almacenado coincide con el esperado.
#[derive(Clone)]
pub struct InMemoryApplicationRepository {
    apps: Arc<RwLock<HashMap<ApplicationId, Application>>>,
}

impl InMemoryApplicationRepository {
    pub fn new() -> Self {
        Self {
            apps: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryApplicationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn save(&self, app: &Application) -> Result<()> {
        let mut apps = self.apps.write().await;
        apps.insert(app.id.clone(), app.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ApplicationId) -> Result<Option<Application>> {
        let apps = self.apps.read().await;
        Ok(apps.get(id).cloned())
    }

    async fn find_by_name(&self, name: &str, namespace: &Namespace) -> Result<Option<Application>> {
        let apps = self.apps.read().await;
        Ok(apps
            .values()
            .find(|app| app.spec.name == name && &app.spec.namespace == namespace)
            .cloned())
    }

    async fn find_by_states(&self, states: &[AppState]) -> Result<Vec<Application>> {
        let apps = self.apps.read().await;
        Ok(apps
            .values()
            .filter(|app| states.contains(&app.state))
            .cloned()
            .collect())
    }

    async fn update(&self, app: &Application) -> Result<()> {
        let mut apps = self.apps.write().await;
        apps.insert(app.id.clone(), app.clone());
        Ok(())
    }

    async fn compare_and_set_state(&self, expected: AppState, app: &Application) -> Result<bool> {
        let mut apps = self.apps.write().await;
        match apps.get(&app.id) {
            Some(stored) if stored.state == expected => {
                apps.insert(app.id.clone(), app.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &ApplicationId) -> Result<()> {
        let mut apps = self.apps.write().await;
        apps.remove(id);
        Ok(())
    }
}
