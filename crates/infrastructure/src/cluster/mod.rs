// Cluster Clients
// Backends concretos del capability ClusterClient

pub mod rest;
pub mod simulated;

pub use rest::{RestClusterClient, RestClusterConfig};
pub use simulated::SimulatedClusterClient;
