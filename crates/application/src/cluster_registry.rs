//! Registro de cluster clients por namespace.
//!
//! Cada namespace destino puede apuntar a un backend distinto; el resto usa
//! el client por defecto. Selección por configuración, sin herencia.

use std::collections::HashMap;
use std::sync::Arc;
use streamops_domain::cluster::ClusterClient;
use streamops_domain::shared_kernel::Namespace;
use tracing::info;

pub struct ClusterRegistry {
    default_client: Arc<dyn ClusterClient>,
    by_namespace: HashMap<Namespace, Arc<dyn ClusterClient>>,
}

impl ClusterRegistry {
    pub fn new(default_client: Arc<dyn ClusterClient>) -> Self {
        Self {
            default_client,
            by_namespace: HashMap::new(),
        }
    }

    /// Asocia un backend específico a un namespace
    pub fn register(&mut self, namespace: Namespace, client: Arc<dyn ClusterClient>) {
        info!(namespace = %namespace, backend = %client.backend(), "registering cluster client");
        self.by_namespace.insert(namespace, client);
    }

    pub fn for_namespace(&self, namespace: &Namespace) -> Arc<dyn ClusterClient> {
        self.by_namespace
            .get(namespace)
            .cloned()
            .unwrap_or_else(|| self.default_client.clone())
    }
}
