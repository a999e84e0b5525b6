// Binario principal del daemon streamops
// Compile: cargo build --bin streamops-server
// Run: cargo run --bin streamops-server

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use streamops_application::{ClusterRegistry, OperationGate, ReconcilerConfig, StateReconciler};
use streamops_domain::apps::ApplicationRepository;
use streamops_domain::cluster::ClusterClient;
use streamops_domain::shared_kernel::{AppState, Namespace};
use streamops_infrastructure::{
    DatabaseConfig, InMemoryApplicationRepository, LoggingEventBus, PostgresApplicationRepository,
    RestClusterClient, RestClusterConfig, SimulatedClusterClient,
};
use streamops_shared::config::{
    ClusterBackendKind, ConfigLoader, PersistenceBackend, ServerConfigDto,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = Path::new(".env");
    let loader = ConfigLoader::new(env_file.exists().then(|| env_file.to_path_buf()));
    let config = loader.load_server_config()?;

    init_tracing(&config);
    info!("Starting streamops server");

    let repository = build_repository(&config).await?;
    let clusters = Arc::new(build_cluster_registry(&config)?);
    let event_bus = Arc::new(LoggingEventBus::new());
    let gate = OperationGate::new();

    log_startup_summary(repository.as_ref()).await;

    let reconciler = Arc::new(StateReconciler::new(
        repository,
        clusters,
        event_bus,
        gate,
        ReconcilerConfig::from_env(),
    ));
    let sweep = reconciler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received; stopping reconciliation");
    sweep.abort();

    Ok(())
}

fn init_tracing(config: &ServerConfigDto) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_repository(
    config: &ServerConfigDto,
) -> anyhow::Result<Arc<dyn ApplicationRepository>> {
    match config.persistence.backend {
        PersistenceBackend::Memory => {
            info!("Using in-memory application repository");
            Ok(Arc::new(InMemoryApplicationRepository::new()))
        }
        PersistenceBackend::Postgres => {
            let database = config
                .persistence
                .database
                .as_ref()
                .expect("validated configuration carries database settings");
            info!("Connecting to PostgreSQL application repository");
            let repository = PostgresApplicationRepository::connect(&DatabaseConfig {
                url: database.url.clone(),
                max_connections: database.pool_size,
                connection_timeout: Duration::from_secs(database.connect_timeout_secs),
            })
            .await?;
            repository.run_migrations().await?;
            Ok(Arc::new(repository))
        }
    }
}

fn build_cluster_registry(config: &ServerConfigDto) -> anyhow::Result<ClusterRegistry> {
    let request_timeout = Duration::from_secs(config.cluster.request_timeout_secs);

    let default_client: Arc<dyn ClusterClient> = match config.cluster.backend {
        ClusterBackendKind::Simulated => {
            warn!("Using the simulated cluster backend; not for production");
            Arc::new(SimulatedClusterClient::new())
        }
        ClusterBackendKind::Rest => {
            let gateway = config
                .cluster
                .gateway_url
                .as_ref()
                .expect("validated configuration carries a gateway URL");
            Arc::new(RestClusterClient::new(
                RestClusterConfig::new(gateway.clone()).with_request_timeout(request_timeout),
            )?)
        }
    };

    let mut registry = ClusterRegistry::new(default_client);
    for (namespace, url) in &config.cluster.namespace_gateways {
        let client = RestClusterClient::new(
            RestClusterConfig::new(url.clone()).with_request_timeout(request_timeout),
        )?;
        registry.register(Namespace::new(namespace.clone()), Arc::new(client));
    }

    Ok(registry)
}

async fn log_startup_summary(repository: &dyn ApplicationRepository) {
    let tracked = repository
        .find_by_states(&[
            AppState::Deploying,
            AppState::Starting,
            AppState::Running,
            AppState::Cancelling,
        ])
        .await;

    match tracked {
        Ok(apps) if apps.is_empty() => info!("No tracked applications at startup"),
        Ok(apps) => {
            for app in &apps {
                info!(
                    app_id = %app.id,
                    name = %app.spec.name,
                    namespace = %app.spec.namespace,
                    state = %app.state,
                    "tracked application found at startup"
                );
            }
            info!(count = apps.len(), "reconciliation will verify tracked applications");
        }
        Err(err) => warn!(error = %err, "could not list tracked applications at startup"),
    }
}
