//! Operation batches submitted to the reconciler loop

use crate::catalog::{CheckRegistration, ServiceRegistration};

/// One atomic batch of mutations, applied to the desired state in FIFO
/// order relative to other batches
#[derive(Debug, Clone, Default)]
pub struct OpBatch {
    /// Services to register or overwrite
    pub reg_services: Vec<ServiceRegistration>,

    /// Checks to register or overwrite
    pub reg_checks: Vec<CheckRegistration>,

    /// Service ids to remove
    pub dereg_services: Vec<String>,

    /// Check ids to remove
    pub dereg_checks: Vec<String>,
}

impl OpBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.reg_services.is_empty()
            && self.reg_checks.is_empty()
            && self.dereg_services.is_empty()
            && self.dereg_checks.is_empty()
    }
}
