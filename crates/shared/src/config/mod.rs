//! Configuration module for the streamops platform
//!
//! Centralized configuration loading, validation and DTOs.
//!
//! # Architecture
//!
//! 1. **Single Source of Truth**: all configuration is loaded once at startup
//! 2. **Fail Fast**: errors are reported immediately, no silent fallbacks
//! 3. **DTO Pattern**: configuration is immutable and passed via dependency injection
//! 4. **Env File Priority**: `.env` file > environment variables > defaults
//!
//! # Environment Variables
//!
//! See [`ServerConfigDto::from_env`] for the full list. The important ones:
//!
//! - `STREAMOPS_PERSISTENCE`: `memory` | `postgres`
//! - `STREAMOPS_DATABASE_URL`: PostgreSQL connection string
//! - `STREAMOPS_CLUSTER_BACKEND`: `rest` | `simulated`
//! - `STREAMOPS_CLUSTER_GATEWAY_URL`: default gateway base URL
//! - `STREAMOPS_RECONCILE_INTERVAL_SECS`: reconciliation sweep interval
//!   (read by the reconciler itself)

pub mod dto;
pub mod error;
pub mod loader;
pub mod validator;

pub use dto::{
    ClusterBackendKind, ClusterConfig, DatabaseConfig, LoggingConfig, OrchestratorConfigDto,
    PersistenceBackend, PersistenceConfig, ServerConfigDto,
};
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use validator::{validate_database_url, validate_gateway_url, validate_server_config};
