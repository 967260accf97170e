//! Sync metrics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters and gauges maintained by the reconciler
#[derive(Debug, Default)]
pub struct SyncMetrics {
    service_registrations: AtomicU64,
    service_deregistrations: AtomicU64,
    check_registrations: AtomicU64,
    check_deregistrations: AtomicU64,
    sync_failures: AtomicU64,
    desired_services: AtomicU64,
    desired_checks: AtomicU64,
}

/// Point-in-time view of the sync metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Services written to the catalog
    pub service_registrations: u64,

    /// Services removed from the catalog
    pub service_deregistrations: u64,

    /// Checks written to the catalog
    pub check_registrations: u64,

    /// Checks removed from the catalog
    pub check_deregistrations: u64,

    /// Failed sync cycles
    pub sync_failures: u64,

    /// Current number of desired services
    pub desired_services: u64,

    /// Current number of desired checks
    pub desired_checks: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_service_registrations(&self) {
        self.service_registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_service_deregistrations(&self) {
        self.service_deregistrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_check_registrations(&self) {
        self.check_registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_check_deregistrations(&self) {
        self.check_deregistrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sync_failures(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_desired(&self, services: usize, checks: usize) {
        self.desired_services
            .store(services as u64, Ordering::Relaxed);
        self.desired_checks.store(checks as u64, Ordering::Relaxed);
    }

    /// Snapshot the current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            service_registrations: self.service_registrations.load(Ordering::Relaxed),
            service_deregistrations: self.service_deregistrations.load(Ordering::Relaxed),
            check_registrations: self.check_registrations.load(Ordering::Relaxed),
            check_deregistrations: self.check_deregistrations.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            desired_services: self.desired_services.load(Ordering::Relaxed),
            desired_checks: self.desired_checks.load(Ordering::Relaxed),
        }
    }
}
