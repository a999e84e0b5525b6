//! Integración del ciclo de vida completo sobre el cluster simulado y el
//! repositorio en memoria: orquestador, canceller y reconciliación juntos.

use std::sync::Arc;
use std::time::Duration;

use streamops_application::{
    CancelConfig, ClusterRegistry, DeploymentPlanner, ExistenceResolver, LifecycleOrchestrator,
    OperationGate, OrchestratorConfig, PlannerConfig, ReconcilerConfig, SavepointCanceller,
    StateReconciler,
};
use streamops_domain::apps::{AppSpec, ApplicationRepository, ResourceProfile};
use streamops_domain::cluster::ClusterJobStatus;
use streamops_domain::shared_kernel::{AppState, DomainError, ExistenceState, Namespace};
use streamops_infrastructure::{
    InMemoryApplicationRepository, InMemoryEventBus, SimulatedClusterClient,
};
use streamops_infrastructure::cluster::simulated::SimulatedBehavior;

struct Stack {
    orchestrator: LifecycleOrchestrator,
    reconciler: StateReconciler,
    repository: Arc<InMemoryApplicationRepository>,
    cluster: SimulatedClusterClient,
}

fn stack() -> Stack {
    let repository = Arc::new(InMemoryApplicationRepository::new());
    let cluster = SimulatedClusterClient::new();
    let registry = Arc::new(ClusterRegistry::new(Arc::new(cluster.clone())));
    let gate = OperationGate::new();
    let bus = Arc::new(InMemoryEventBus::new());

    let orchestrator = LifecycleOrchestrator::new(
        repository.clone(),
        registry.clone(),
        DeploymentPlanner::new(PlannerConfig {
            backup_dir: std::env::temp_dir().join("streamops-it-backups"),
        }),
        ExistenceResolver::new(repository.clone(), registry.clone()),
        SavepointCanceller::new(
            repository.clone(),
            registry.clone(),
            bus.clone(),
            CancelConfig {
                confirm_poll_interval: Duration::from_millis(5),
            },
        ),
        gate.clone(),
        bus.clone(),
        OrchestratorConfig {
            start_confirm_timeout: Duration::from_millis(100),
            start_poll_interval: Duration::from_millis(5),
        },
    );

    let reconciler = StateReconciler::new(
        repository.clone(),
        registry,
        bus,
        gate,
        ReconcilerConfig::default(),
    );

    Stack {
        orchestrator,
        reconciler,
        repository,
        cluster,
    }
}

fn spec(name: &str, namespace: &str) -> AppSpec {
    AppSpec::new(name, Namespace::new(namespace))
        .with_artifact(format!("/artifacts/{}.jar", name))
        .with_resources(ResourceProfile::default())
        .with_engine_param("checkpoint.interval", "60000")
}

#[tokio::test]
async fn test_full_lifecycle_against_simulated_cluster() {
    let s = stack();

    let app_id = s.orchestrator.create(spec("job1", "ns1")).await.unwrap();
    assert_eq!(
        s.orchestrator
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap(),
        ExistenceState::NotExists
    );

    assert_eq!(
        s.orchestrator.deploy(&app_id, false).await.unwrap(),
        AppState::Deployed
    );
    assert_eq!(
        s.orchestrator.start_up(&app_id).await.unwrap(),
        AppState::Running
    );

    // La instancia propia ahora existe y corre
    assert_eq!(
        s.orchestrator
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap(),
        ExistenceState::ExistsRunning
    );

    let state = s
        .orchestrator
        .cancel(&app_id, Some("/sp/1".into()), Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(state, AppState::Cancelled);

    let stored = s.repository.find_by_id(&app_id).await.unwrap().unwrap();
    assert_eq!(stored.savepoint_path.as_deref(), Some("/sp/1"));
    assert_eq!(stored.cluster_handle, None);
    assert!(stored.handle_invariant_holds());
}

#[tokio::test]
async fn test_cancel_with_gateway_down_resolves_via_reconciliation() {
    let s = stack();
    let app_id = s.orchestrator.create(spec("job1", "ns1")).await.unwrap();
    s.orchestrator.deploy(&app_id, false).await.unwrap();
    s.orchestrator.start_up(&app_id).await.unwrap();

    s.cluster
        .set_behavior(SimulatedBehavior {
            unreachable: true,
            ..Default::default()
        })
        .await;

    let err = s
        .orchestrator
        .cancel(&app_id, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::ClusterUnreachable { .. }));
    assert_eq!(
        s.orchestrator.get_state(&app_id).await.unwrap(),
        AppState::Cancelling
    );

    // El gateway vuelve y la instancia aparece parada (la parada llegó a
    // ejecutarse en el cluster); el barrido confirma la cancelación
    s.cluster.set_behavior(SimulatedBehavior::default()).await;
    let stored = s.repository.find_by_id(&app_id).await.unwrap().unwrap();
    let handle = stored.cluster_handle.unwrap();
    s.cluster
        .set_status(&handle, ClusterJobStatus::Stopped)
        .await;

    let report = s.reconciler.run_once().await.unwrap();
    assert_eq!(report.cancelled, 1);
    assert_eq!(
        s.orchestrator.get_state(&app_id).await.unwrap(),
        AppState::Cancelled
    );
}

#[tokio::test]
async fn test_vanished_instance_is_detected_as_lost() {
    let s = stack();
    let app_id = s.orchestrator.create(spec("job1", "ns1")).await.unwrap();
    s.orchestrator.deploy(&app_id, false).await.unwrap();
    s.orchestrator.start_up(&app_id).await.unwrap();

    let stored = s.repository.find_by_id(&app_id).await.unwrap().unwrap();
    s.cluster.vanish(&stored.cluster_handle.unwrap()).await;

    let report = s.reconciler.run_once().await.unwrap();
    assert_eq!(report.lost, 1);

    let stored = s.repository.find_by_id(&app_id).await.unwrap().unwrap();
    assert_eq!(stored.state, AppState::Lost);
    assert_eq!(stored.cluster_handle, None);

    // LOST es redeployable: nueva época, handle nuevo
    assert_eq!(
        s.orchestrator.deploy(&app_id, false).await.unwrap(),
        AppState::Deployed
    );
    let stored = s.repository.find_by_id(&app_id).await.unwrap().unwrap();
    assert_eq!(stored.deploy_epoch, 2);
    assert!(stored.cluster_handle.is_some());
}

#[tokio::test]
async fn test_start_timeout_then_reconciliation_confirms_running() {
    let s = stack();
    let app_id = s.orchestrator.create(spec("job1", "ns1")).await.unwrap();
    s.orchestrator.deploy(&app_id, false).await.unwrap();

    // El arranque entra pero la API de tracking no responde
    s.cluster
        .set_behavior(SimulatedBehavior {
            queries_unreachable: true,
            ..Default::default()
        })
        .await;

    let err = s.orchestrator.start_up(&app_id).await.unwrap_err();
    assert!(matches!(err, DomainError::OperationTimeout { .. }));
    assert_eq!(
        s.orchestrator.get_state(&app_id).await.unwrap(),
        AppState::Starting
    );

    // El tracking vuelve: el barrido observa RUNNING y actualiza
    s.cluster.set_behavior(SimulatedBehavior::default()).await;
    let report = s.reconciler.run_once().await.unwrap();
    assert_eq!(report.confirmed_running, 1);
    assert_eq!(
        s.orchestrator.get_state(&app_id).await.unwrap(),
        AppState::Running
    );
}

#[tokio::test]
async fn test_foreign_name_collision_blocks_deploy() {
    use streamops_domain::cluster::{ClusterClient, SubmissionDescriptor};
    use streamops_domain::shared_kernel::ApplicationId;

    let s = stack();

    // Un job ajeno con el mismo nombre ya vive en el namespace: entró al
    // cluster por fuera de este sistema
    let foreign = SubmissionDescriptor {
        app_id: ApplicationId::new(),
        name: "job1".into(),
        namespace: Namespace::new("ns1"),
        artifact: "/elsewhere/job1.jar".into(),
        resources: ResourceProfile::default(),
        engine_params: Default::default(),
        epoch: 1,
    };
    let foreign_handle = s.cluster.submit(&foreign).await.unwrap();
    s.cluster.start(&foreign_handle).await.unwrap();

    let app_id = s.orchestrator.create(spec("job1", "ns1")).await.unwrap();

    assert_eq!(
        s.orchestrator
            .check_exists("job1", &Namespace::new("ns1"))
            .await
            .unwrap(),
        ExistenceState::ForeignCollision
    );

    // El deploy no adopta ni sobreescribe la instancia ajena
    let err = s.orchestrator.deploy(&app_id, false).await.unwrap_err();
    assert!(matches!(err, DomainError::ExistenceConflict { .. }));
    assert_eq!(
        s.orchestrator.get_state(&app_id).await.unwrap(),
        AppState::Created
    );
}

#[tokio::test]
async fn test_rejected_submission_reverts_and_allows_retry() {
    let s = stack();
    let app_id = s.orchestrator.create(spec("job1", "ns1")).await.unwrap();

    s.cluster
        .set_behavior(SimulatedBehavior {
            reject_submissions: true,
            ..Default::default()
        })
        .await;
    let err = s.orchestrator.deploy(&app_id, false).await.unwrap_err();
    assert!(matches!(err, DomainError::ClusterRejected { .. }));
    assert_eq!(
        s.orchestrator.get_state(&app_id).await.unwrap(),
        AppState::Created
    );

    // El operador reintenta cuando el cluster acepta de nuevo
    s.cluster.set_behavior(SimulatedBehavior::default()).await;
    assert_eq!(
        s.orchestrator.deploy(&app_id, false).await.unwrap(),
        AppState::Deployed
    );
}
