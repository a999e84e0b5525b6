//! Exclusión mutua por aplicación.
//!
//! Como mucho una operación de ciclo de vida (deploy/start/cancel/reconcile)
//! puede estar en vuelo por identificador. Una segunda operación concurrente
//! sobre el mismo id falla rápido con `OperationInFlight`; nunca se encola.

use dashmap::DashMap;
use std::sync::Arc;
use streamops_domain::shared_kernel::{ApplicationId, DomainError, Result};
use tracing::debug;

/// Puerta de operaciones: registro de ids con una operación en vuelo
#[derive(Debug, Default)]
pub struct OperationGate {
    in_flight: DashMap<ApplicationId, &'static str>,
}

impl OperationGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: DashMap::new(),
        })
    }

    /// Intenta adquirir el permiso para `operation` sobre `app_id`.
    ///
    /// El permiso se libera al hacer drop. Las transiciones de estado de una
    /// aplicación quedan linearizadas por esta puerta.
    pub fn acquire(
        self: &Arc<Self>,
        app_id: &ApplicationId,
        operation: &'static str,
    ) -> Result<OperationPermit> {
        let entry = self.in_flight.entry(app_id.clone());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(held) => {
                debug!(
                    app_id = %app_id,
                    requested = operation,
                    held_by = held.get(),
                    "operation rejected: id busy"
                );
                Err(DomainError::OperationInFlight {
                    app_id: app_id.clone(),
                })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(operation);
                Ok(OperationPermit {
                    gate: Arc::clone(self),
                    app_id: app_id.clone(),
                })
            }
        }
    }

    pub fn is_busy(&self, app_id: &ApplicationId) -> bool {
        self.in_flight.contains_key(app_id)
    }
}

/// Permiso RAII: liberarlo devuelve el id a la puerta
#[derive(Debug)]
pub struct OperationPermit {
    gate: Arc<OperationGate>,
    app_id: ApplicationId,
}

impl Drop for OperationPermit {
    fn drop(&mut self) {
        self.gate.in_flight.remove(&self.app_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_fast() {
        let gate = OperationGate::new();
        let id = ApplicationId::new();

        let permit = gate.acquire(&id, "deploy").unwrap();
        let err = gate.acquire(&id, "cancel").unwrap_err();
        assert!(matches!(err, DomainError::OperationInFlight { .. }));
        assert!(gate.is_busy(&id));

        drop(permit);
        assert!(!gate.is_busy(&id));
        assert!(gate.acquire(&id, "cancel").is_ok());
    }

    #[test]
    fn test_distinct_ids_do_not_contend() {
        let gate = OperationGate::new();
        let a = ApplicationId::new();
        let b = ApplicationId::new();

        let _pa = gate.acquire(&a, "deploy").unwrap();
        assert!(gate.acquire(&b, "deploy").is_ok());
    }
}
