// Streamops Platform - Infrastructure Layer
// Adaptadores: persistencia, cluster clients y event bus

pub mod cluster;
pub mod event_bus;
pub mod persistence;
pub mod repositories;

pub use cluster::*;
pub use event_bus::*;
pub use persistence::postgres::PostgresApplicationRepository;
pub use persistence::DatabaseConfig;
pub use repositories::*;
