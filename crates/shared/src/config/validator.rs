//! Configuration validation
//!
//! This module provides validation logic for configuration DTOs.

use super::dto::{ClusterBackendKind, PersistenceBackend, ServerConfigDto};
use super::error::{ConfigError, Result};

/// Validate a database URL format
pub fn validate_database_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ConfigError::InvalidDatabaseUrl(
            "Database URL cannot be empty".to_string(),
        ));
    }

    if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
        return Err(ConfigError::InvalidDatabaseUrl(format!(
            "Database URL must start with postgres:// or postgresql://, got: {}",
            url
        )));
    }

    Ok(())
}

/// Validate a cluster gateway base URL
pub fn validate_gateway_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ConfigError::InvalidUrl(
            "Gateway URL cannot be empty".to_string(),
        ));
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::InvalidUrl(format!(
            "Gateway URL must start with http:// or https://, got: {}",
            url
        )));
    }

    Ok(())
}

/// Validate the complete server configuration
///
/// Fail fast: any inconsistency is reported before the server starts.
pub fn validate_server_config(config: &ServerConfigDto) -> Result<()> {
    if config.persistence.backend == PersistenceBackend::Postgres {
        let database = config.persistence.database.as_ref().ok_or_else(|| {
            ConfigError::Validation(
                "Postgres persistence selected but no database configuration present".to_string(),
            )
        })?;
        validate_database_url(&database.url)?;
        if database.pool_size == 0 {
            return Err(ConfigError::Validation(
                "Database pool size must be greater than zero".to_string(),
            ));
        }
    }

    if config.cluster.backend == ClusterBackendKind::Rest {
        let gateway = config.cluster.gateway_url.as_ref().ok_or_else(|| {
            ConfigError::Validation(
                "REST cluster backend selected but no gateway URL present".to_string(),
            )
        })?;
        validate_gateway_url(gateway)?;
    }

    for (namespace, url) in &config.cluster.namespace_gateways {
        validate_gateway_url(url).map_err(|_| {
            ConfigError::Validation(format!(
                "Invalid gateway URL for namespace '{}': {}",
                namespace, url
            ))
        })?;
    }

    if config.cluster.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "Cluster request timeout must be greater than zero".to_string(),
        ));
    }

    if config.orchestrator.start_poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "Start poll interval must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
