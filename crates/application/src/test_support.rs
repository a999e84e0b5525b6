//! Mocks compartidos por los tests de la capa de aplicación.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use streamops_domain::apps::{AppSpec, Application, ApplicationRepository, ResourceProfile};
use streamops_domain::cluster::{
    ClusterBackend, ClusterClient, ClusterError, ClusterJobStatus, RemoteApplication, StopOutcome,
    SubmissionDescriptor,
};
use streamops_domain::event_bus::{EventBus, EventBusError};
use streamops_domain::events::DomainEvent;
use streamops_domain::shared_kernel::{
    AppState, ApplicationId, ClusterHandle, Namespace, Result,
};

type ClusterResult<T> = std::result::Result<T, ClusterError>;

fn clone_cluster_error(err: &ClusterError) -> ClusterError {
    match err {
        ClusterError::Unreachable(s) => ClusterError::Unreachable(s.clone()),
        ClusterError::Rejected(s) => ClusterError::Rejected(s.clone()),
        ClusterError::Timeout(d) => ClusterError::Timeout(*d),
        ClusterError::Backend(s) => ClusterError::Backend(s.clone()),
    }
}

fn clone_result<T: Clone>(result: &ClusterResult<T>) -> ClusterResult<T> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(clone_cluster_error(e)),
    }
}

/// Repositorio en memoria para tests
#[derive(Default)]
pub struct MockRepository {
    apps: Mutex<HashMap<ApplicationId, Application>>,
}

impl MockRepository {
    pub fn seed(&self, app: Application) {
        self.apps.lock().unwrap().insert(app.id.clone(), app);
    }

    pub fn get(&self, id: &ApplicationId) -> Application {
        self.apps
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .expect("application seeded")
    }
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

    async fn find_by_name(&self, name: &str, namespace: &Namespace) -> Result<Option<Application>> {
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

    async fn compare_and_set_state(&self, expected: AppState, app: &Application) -> Result<bool> {
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

/// Cluster client con respuestas programables por test
pub struct ScriptedCluster {
    submit: Mutex<ClusterResult<ClusterHandle>>,
    submit_calls: AtomicUsize,
    start: Mutex<ClusterResult<()>>,
    start_calls: AtomicUsize,
    status_script: Mutex<VecDeque<ClusterResult<ClusterJobStatus>>>,
    status_default: Mutex<ClusterResult<ClusterJobStatus>>,
    status_calls: AtomicUsize,
    by_name: Mutex<ClusterResult<Option<RemoteApplication>>>,
    stop: Mutex<ClusterResult<StopOutcome>>,
    stop_calls: AtomicUsize,
    last_stop: Mutex<Option<(Option<String>, Option<Duration>)>>,
    force: Mutex<ClusterResult<StopOutcome>>,
    force_calls: AtomicUsize,
}

impl Default for ScriptedCluster {
    fn default() -> Self {
        Self {
            submit: Mutex::new(Ok(ClusterHandle::new("h1"))),
            submit_calls: AtomicUsize::new(0),
            start: Mutex::new(Ok(())),
            start_calls: AtomicUsize::new(0),
            status_script: Mutex::new(VecDeque::new()),
            status_default: Mutex::new(Ok(ClusterJobStatus::Running)),
            status_calls: AtomicUsize::new(0),
            by_name: Mutex::new(Ok(None)),
            stop: Mutex::new(Ok(StopOutcome::Stopped { savepoint: None })),
            stop_calls: AtomicUsize::new(0),
            last_stop: Mutex::new(None),
            force: Mutex::new(Ok(StopOutcome::Stopped { savepoint: None })),
            force_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedCluster {
    pub fn set_submit(&self, result: ClusterResult<ClusterHandle>) {
        *self.submit.lock().unwrap() = result;
    }

    pub fn set_start(&self, result: ClusterResult<()>) {
        *self.start.lock().unwrap() = result;
    }

    /// Respuesta de query_by_handle cuando el guion se agota
    pub fn set_status_default(&self, result: ClusterResult<ClusterJobStatus>) {
        *self.status_default.lock().unwrap() = result;
    }

    /// Encola una respuesta puntual de query_by_handle
    pub fn push_status(&self, result: ClusterResult<ClusterJobStatus>) {
        self.status_script.lock().unwrap().push_back(result);
    }

    pub fn set_by_name(&self, result: ClusterResult<Option<RemoteApplication>>) {
        *self.by_name.lock().unwrap() = result;
    }

    pub fn set_stop(&self, result: ClusterResult<StopOutcome>) {
        *self.stop.lock().unwrap() = result;
    }

    pub fn set_force(&self, result: ClusterResult<StopOutcome>) {
        *self.force.lock().unwrap() = result;
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn force_calls(&self) -> usize {
        self.force_calls.load(Ordering::SeqCst)
    }

    pub fn last_stop_args(&self) -> (Option<String>, Option<Duration>) {
        self.last_stop
            .lock()
            .unwrap()
            .clone()
            .expect("request_stop called")
    }
}

#[async_trait]
impl ClusterClient for ScriptedCluster {
    fn backend(&self) -> ClusterBackend {
        ClusterBackend::Simulated
    }

    async fn submit(
        &self,
        _descriptor: &SubmissionDescriptor,
    ) -> ClusterResult<ClusterHandle> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        clone_result(&self.submit.lock().unwrap())
    }

    async fn start(&self, _handle: &ClusterHandle) -> ClusterResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        clone_result(&self.start.lock().unwrap())
    }

    async fn query_by_handle(&self, _handle: &ClusterHandle) -> ClusterResult<ClusterJobStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.status_script.lock().unwrap().pop_front() {
            return scripted;
        }
        clone_result(&self.status_default.lock().unwrap())
    }

    async fn query_by_name(
        &self,
        _name: &str,
        _namespace: &Namespace,
    ) -> ClusterResult<Option<RemoteApplication>> {
        clone_result(&self.by_name.lock().unwrap())
    }

    async fn request_stop(
        &self,
        _handle: &ClusterHandle,
        savepoint_path: Option<&str>,
        drain: Option<Duration>,
    ) -> ClusterResult<StopOutcome> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_stop.lock().unwrap() =
            Some((savepoint_path.map(|s| s.to_string()), drain));
        clone_result(&self.stop.lock().unwrap())
    }

    async fn force_stop(&self, _handle: &ClusterHandle) -> ClusterResult<StopOutcome> {
        self.force_calls.fetch_add(1, Ordering::SeqCst);
        clone_result(&self.force.lock().unwrap())
    }
}

/// Bus de eventos que captura lo publicado
#[derive(Default)]
pub struct CapturingEventBus {
    events: Mutex<Vec<DomainEvent>>,
}

impl CapturingEventBus {
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBus for CapturingEventBus {
    async fn publish(&self, event: &DomainEvent) -> std::result::Result<(), EventBusError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn created_app(name: &str, namespace: &str) -> Application {
    let spec = AppSpec::new(name, Namespace::new(namespace))
        .with_artifact(format!("/artifacts/{}.jar", name))
        .with_resources(ResourceProfile::default());
    Application::new(ApplicationId::new(), spec)
}

pub fn deployed_app(name: &str, namespace: &str, handle: &str) -> Application {
    let mut app = created_app(name, namespace);
    app.mark_deploying().unwrap();
    app.mark_deployed(ClusterHandle::new(handle)).unwrap();
    app
}

pub fn running_app(name: &str, namespace: &str, handle: &str) -> Application {
    let mut app = deployed_app(name, namespace, handle);
    app.mark_starting().unwrap();
    app.mark_running().unwrap();
    app
}
