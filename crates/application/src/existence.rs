//! Existence Resolver
//!
//! Determina si el nombre declarado de una aplicación ya tiene presencia en
//! el cluster, distinguiendo instancias propias de colisiones ajenas. Los
//! errores de transporte se devuelven como UNKNOWN, nunca como NOT_EXISTS:
//! un falso negativo podría producir una submission duplicada.

use crate::cluster_registry::ClusterRegistry;
use std::sync::Arc;
use streamops_domain::apps::{Application, ApplicationRepository};
use streamops_domain::cluster::ClusterJobStatus;
use streamops_domain::shared_kernel::{ExistenceState, Namespace, Result};
use tracing::warn;

pub struct ExistenceResolver {
    repository: Arc<dyn ApplicationRepository>,
    clusters: Arc<ClusterRegistry>,
}

impl ExistenceResolver {
    pub fn new(repository: Arc<dyn ApplicationRepository>, clusters: Arc<ClusterRegistry>) -> Self {
        Self {
            repository,
            clusters,
        }
    }

    /// Resuelve la existencia de un nombre arbitrario dentro de un namespace
    pub async fn check_exists(&self, name: &str, namespace: &Namespace) -> Result<ExistenceState> {
        let local = self.repository.find_by_name(name, namespace).await?;
        self.resolve_against(name, namespace, local.as_ref()).await
    }

    /// Resuelve la existencia para una aplicación ya cargada
    pub async fn resolve(&self, app: &Application) -> Result<ExistenceState> {
        self.resolve_against(&app.spec.name, &app.spec.namespace, Some(app))
            .await
    }

    async fn resolve_against(
        &self,
        name: &str,
        namespace: &Namespace,
        local: Option<&Application>,
    ) -> Result<ExistenceState> {
        let client = self.clusters.for_namespace(namespace);
        let remote = match client.query_by_name(name, namespace).await {
            Ok(remote) => remote,
            Err(err) => {
                warn!(
                    name,
                    namespace = %namespace,
                    error = %err,
                    "existence query failed, reporting UNKNOWN"
                );
                return Ok(ExistenceState::Unknown);
            }
        };

        let Some(remote) = remote else {
            return Ok(ExistenceState::NotExists);
        };

        // Una instancia solo es nuestra si su handle coincide con el actual o
        // con el último auditado (una época anterior que el cluster aún
        // lista); todo lo demás es una colisión ajena.
        let is_ours = local.is_some_and(|app| {
            app.cluster_handle.as_ref() == Some(&remote.handle)
                || app.last_handle.as_ref() == Some(&remote.handle)
        });
        if !is_ours {
            return Ok(ExistenceState::ForeignCollision);
        }

        Ok(match remote.status {
            ClusterJobStatus::Running => ExistenceState::ExistsRunning,
            ClusterJobStatus::Stopped => ExistenceState::ExistsStopped,
            ClusterJobStatus::NotFound => ExistenceState::NotExists,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use streamops_domain::apps::{AppSpec, ResourceProfile};
    use streamops_domain::cluster::{
        ClusterBackend, ClusterClient, ClusterError, RemoteApplication, StopOutcome,
        SubmissionDescriptor,
    };
    use streamops_domain::shared_kernel::{AppState, ApplicationId, ClusterHandle};

    #[derive(Default)]
    struct MockRepository {
        apps: Mutex<HashMap<ApplicationId, Application>>,
    }

    #[async_trait]
    impl ApplicationRepository for MockRepository {
        async fn save(&self, app: &Application) -> Result<()> {
            self.apps.lock().unwrap().insert(app.id.clone(), app.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &ApplicationId) -> Result<Option<Application>> {
            Ok(self.apps.lock().unwrap().get(id).cloned())
        }

        async fn find_by_name(
            &self,
            name: &str,
            namespace: &Namespace,
        ) -> Result<Option<Application>> {
            Ok(self
                .apps
                .lock()
                .unwrap()
                .values()
                .find(|a| a.spec.name == name && &a.spec.namespace == namespace)
                .cloned())
        }

        async fn find_by_states(&self, states: &[AppState]) -> Result<Vec<Application>> {
            Ok(self
                .apps
                .lock()
                .unwrap()
                .values()
                .filter(|a| states.contains(&a.state))
                .cloned()
                .collect())
        }

        async fn update(&self, app: &Application) -> Result<()> {
            self.save(app).await
        }

        async fn compare_and_set_state(
            &self,
            expected: AppState,
            app: &Application,
        ) -> Result<bool> {
            let mut apps = self.apps.lock().unwrap();
            match apps.get(&app.id) {
                Some(stored) if stored.state == expected => {
                    apps.insert(app.id.clone(), app.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn delete(&self, id: &ApplicationId) -> Result<()> {
            self.apps.lock().unwrap().remove(id);
            Ok(())
        }
    }

    struct MockClusterClient {
        by_name: Option<RemoteApplication>,
        unreachable: bool,
    }

    #[async_trait]
    impl ClusterClient for MockClusterClient {
        fn backend(&self) -> ClusterBackend {
            ClusterBackend::Simulated
        }

        async fn submit(
            &self,
            _descriptor: &SubmissionDescriptor,
        ) -> std::result::Result<ClusterHandle, ClusterError> {
            unimplemented!("not used by resolver tests")
        }

        async fn start(&self, _handle: &ClusterHandle) -> std::result::Result<(), ClusterError> {
            unimplemented!("not used by resolver tests")
        }

        async fn query_by_handle(
            &self,
            _handle: &ClusterHandle,
        ) -> std::result::Result<ClusterJobStatus, ClusterError> {
            unimplemented!("not used by resolver tests")
        }

        async fn query_by_name(
            &self,
            _name: &str,
            _namespace: &Namespace,
        ) -> std::result::Result<Option<RemoteApplication>, ClusterError> {
            if self.unreachable {
                return Err(ClusterError::Unreachable("connection refused".into()));
            }
            Ok(self.by_name.clone())
        }

        async fn request_stop(
            &self,
            _handle: &ClusterHandle,
            _savepoint_path: Option<&str>,
            _drain: Option<Duration>,
        ) -> std::result::Result<StopOutcome, ClusterError> {
            unimplemented!("not used by resolver tests")
        }

        async fn force_stop(
            &self,
            _handle: &ClusterHandle,
        ) -> std::result::Result<StopOutcome, ClusterError> {
            unimplemented!("not used by resolver tests")
        }
    }

    fn resolver_with(
        client: MockClusterClient,
        seed: Option<Application>,
    ) -> (ExistenceResolver, Arc<MockRepository>) {
        let repository = Arc::new(MockRepository::default());
        if let Some(app) = seed {
            repository.apps.lock().unwrap().insert(app.id.clone(), app);
        }
        let registry = Arc::new(ClusterRegistry::new(Arc::new(client)));
        (
            ExistenceResolver::new(repository.clone(), registry),
            repository,
        )
    }

    fn running_app(handle: &str) -> Application {
        let spec = AppSpec::new("job1", Namespace::new("ns1"))
            .with_artifact("/artifacts/job1.jar")
            .with_resources(ResourceProfile::default());
        let mut app = Application::new(ApplicationId::new(), spec);
        app.mark_deploying().unwrap();
        app.mark_deployed(ClusterHandle::new(handle)).unwrap();
        app.mark_starting().unwrap();
        app.mark_running().unwrap();
        app
    }

    #[tokio::test]
    async fn test_no_remote_instance_is_not_exists() {
        let (resolver, _) = resolver_with(
            MockClusterClient {
                by_name: None,
                unreachable: false,
            },
            None,
        );
        let state = resolver
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap();
        assert_eq!(state, ExistenceState::NotExists);
    }

    #[tokio::test]
    async fn test_matching_handle_reports_own_instance() {
        let app = running_app("h1");
        let (resolver, _) = resolver_with(
            MockClusterClient {
                by_name: Some(RemoteApplication {
                    handle: ClusterHandle::new("h1"),
                    status: ClusterJobStatus::Running,
                }),
                unreachable: false,
            },
            Some(app),
        );
        let state = resolver
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap();
        assert_eq!(state, ExistenceState::ExistsRunning);
    }

    #[tokio::test]
    async fn test_mismatched_handle_is_foreign_collision() {
        let app = running_app("h1");
        let (resolver, _) = resolver_with(
            MockClusterClient {
                by_name: Some(RemoteApplication {
                    handle: ClusterHandle::new("someone-elses"),
                    status: ClusterJobStatus::Running,
                }),
                unreachable: false,
            },
            Some(app),
        );
        let state = resolver
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap();
        assert_eq!(state, ExistenceState::ForeignCollision);
    }

    #[tokio::test]
    async fn test_remote_without_local_record_is_foreign() {
        let (resolver, _) = resolver_with(
            MockClusterClient {
                by_name: Some(RemoteApplication {
                    handle: ClusterHandle::new("h9"),
                    status: ClusterJobStatus::Stopped,
                }),
                unreachable: false,
            },
            None,
        );
        let state = resolver
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap();
        assert_eq!(state, ExistenceState::ForeignCollision);
    }

    #[tokio::test]
    async fn test_prior_epoch_handle_is_still_ours() {
        // Aplicación terminada: el handle actual se limpió pero el cluster
        // aún lista la instancia de la época anterior
        let mut app = running_app("h1");
        app.mark_failed("crashed").unwrap();
        let (resolver, _) = resolver_with(
            MockClusterClient {
                by_name: Some(RemoteApplication {
                    handle: ClusterHandle::new("h1"),
                    status: ClusterJobStatus::Stopped,
                }),
                unreachable: false,
            },
            Some(app),
        );
        let state = resolver
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap();
        assert_eq!(state, ExistenceState::ExistsStopped);
    }

    #[tokio::test]
    async fn test_transport_error_reports_unknown() {
        let (resolver, _) = resolver_with(
            MockClusterClient {
                by_name: None,
                unreachable: true,
            },
            None,
        );
        let state = resolver
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap();
        assert_eq!(state, ExistenceState::Unknown);
    }
}
