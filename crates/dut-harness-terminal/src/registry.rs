//! Exclusivity tracking for physical transports.
//!
//! Two sessions must never attach to the same serial device at once. The
//! registry is an explicit, injectable object (not a module-level global)
//! so tests can use isolated instances.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use dut_harness_common::mutex_lock_or_recover;

use crate::error::PtyError;

/// Process-wide set of currently claimed transport identifiers.
#[derive(Debug, Clone, Default)]
pub struct TransportRegistry {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `transport`, failing if another session already holds it.
    /// The claim is released when the returned guard drops, which also
    /// covers abnormal session teardown.
    pub fn claim(&self, transport: &str) -> Result<TransportClaim, PtyError> {
        let mut claimed = mutex_lock_or_recover(&self.claimed);
        if !claimed.insert(transport.to_string()) {
            return Err(PtyError::TransportBusy(transport.to_string()));
        }
        Ok(TransportClaim {
            registry: self.clone(),
            transport: transport.to_string(),
        })
    }

    pub fn is_claimed(&self, transport: &str) -> bool {
        mutex_lock_or_recover(&self.claimed).contains(transport)
    }

    fn release(&self, transport: &str) {
        mutex_lock_or_recover(&self.claimed).remove(transport);
    }
}

/// RAII handle for one claimed transport.
#[derive(Debug)]
pub struct TransportClaim {
    registry: TransportRegistry,
    transport: String,
}

impl TransportClaim {
    pub fn transport(&self) -> &str {
        &self.transport
    }
}

impl Drop for TransportClaim {
    fn drop(&mut self) {
        self.registry.release(&self.transport);
    }
}
