//! Reconciler loop: desired state, catalog diffing, retry and shutdown drain

use crate::catalog::{service_update_required, CatalogApi};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::ident;
use crate::metrics::SyncMetrics;
use crate::ops::OpBatch;
use crate::types::AgentRole;
use crate::watch::CheckWatcher;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

/// Authoritative in-memory model of what should be registered.
///
/// Owned exclusively by the reconciler task; producers only reach it through
/// op batches.
#[derive(Default)]
pub(crate) struct DesiredState {
    pub(crate) services: HashMap<String, crate::catalog::ServiceRegistration>,
    pub(crate) checks: HashMap<String, crate::catalog::CheckRegistration>,

    // Ids this process intentionally removed since startup. Authorizes
    // eviction during the probation window, so the sets must survive failed
    // sync cycles and be cleared only after a fully successful one.
    pub(crate) deregistered_services: HashSet<String>,
    pub(crate) deregistered_checks: HashSet<String>,
}

impl DesiredState {
    /// Apply one op batch
    pub(crate) fn merge(&mut self, batch: OpBatch) {
        for service in batch.reg_services {
            self.services.insert(service.id.clone(), service);
        }
        for check in batch.reg_checks {
            self.checks.insert(check.id.clone(), check);
        }
        for id in batch.dereg_services {
            self.services.remove(&id);
            self.deregistered_services.insert(id);
        }
        for id in batch.dereg_checks {
            self.checks.remove(&id);
            self.deregistered_checks.insert(id);
        }
    }

    fn clear_explicitly_deregistered(&mut self) {
        self.deregistered_services.clear();
        self.deregistered_checks.clear();
    }
}

/// Backoff after `failures` consecutive sync failures
pub(crate) fn retry_backoff(retry: Duration, max: Duration, failures: u32) -> Duration {
    std::cmp::min(retry * failures, max)
}

/// The long-lived reconciliation task.
///
/// Created together with [`crate::sync::CatalogSync`]; run it with
/// [`Reconciler::run`] on its own task.
pub struct Reconciler {
    catalog: Arc<dyn CatalogApi>,
    watcher: Arc<dyn CheckWatcher>,
    config: SyncConfig,
    role: AgentRole,
    op_rx: mpsc::Receiver<OpBatch>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
    seen: Arc<AtomicBool>,
    metrics: Arc<SyncMetrics>,
    desired: DesiredState,
    probation_deadline: Instant,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        catalog: Arc<dyn CatalogApi>,
        watcher: Arc<dyn CheckWatcher>,
        config: SyncConfig,
        role: AgentRole,
        op_rx: mpsc::Receiver<OpBatch>,
        shutdown_tx: broadcast::Sender<()>,
        shutting_down: Arc<AtomicBool>,
        seen: Arc<AtomicBool>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        let probation_deadline = Instant::now() + config.probation_window;
        Self {
            catalog,
            watcher,
            config,
            role,
            op_rx,
            shutdown_tx,
            shutting_down,
            seen,
            metrics,
            desired: DesiredState::default(),
            probation_deadline,
        }
    }

    /// Run the reconciliation loop until shutdown. Call exactly once.
    pub async fn run(mut self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut probe_shutdown = self.shutdown_tx.subscribe();

        // Shutdown signalled before this task started; the subscriptions
        // above would never see it
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        // Probe in the background until the catalog agent answers; merge
        // incoming batches while waiting but do not sync before first
        // contact.
        let (init_tx, mut init_rx) = mpsc::channel::<()>(1);
        let probe_catalog = self.catalog.clone();
        let probe_interval = self.config.retry_interval;
        tokio::spawn(async move {
            loop {
                match probe_catalog.agent_self().await {
                    Ok(()) => {
                        let _ = init_tx.send(()).await;
                        return;
                    }
                    Err(e) => debug!("catalog agent not yet reachable: {}", e),
                }
                tokio::select! {
                    _ = time::sleep(probe_interval) => {}
                    _ = probe_shutdown.recv() => return,
                }
            }
        });

        // Results are hoisted out of each select so the handlers below can
        // borrow the reconciler freely.
        enum InitEvent {
            Contacted,
            Shutdown,
            Batch(Option<OpBatch>),
        }

        loop {
            let event = tokio::select! {
                contacted = init_rx.recv() => match contacted {
                    Some(()) => InitEvent::Contacted,
                    None => InitEvent::Shutdown,
                },
                _ = shutdown_rx.recv() => InitEvent::Shutdown,
                batch = self.op_rx.recv() => InitEvent::Batch(batch),
            };

            match event {
                InitEvent::Contacted => {
                    self.seen.store(true, Ordering::SeqCst);
                    break;
                }
                InitEvent::Shutdown | InitEvent::Batch(None) => return,
                InitEvent::Batch(Some(batch)) => self.merge_batch(batch),
            }
        }
        debug!("able to contact catalog agent");

        // First contact made; start the check watcher
        let watcher = self.watcher.clone();
        let watcher_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            watcher.run(watcher_shutdown).await;
        });

        enum RunEvent {
            SyncTimer,
            Shutdown,
            Batch(Option<OpBatch>),
        }

        // Sync immediately to reconcile local and catalog state
        let mut next_sync = Instant::now();
        let mut failures: u32 = 0;

        loop {
            let event = tokio::select! {
                _ = time::sleep_until(next_sync) => RunEvent::SyncTimer,
                _ = shutdown_rx.recv() => RunEvent::Shutdown,
                batch = self.op_rx.recv() => RunEvent::Batch(batch),
            };

            match event {
                RunEvent::SyncTimer => match self.sync().await {
                    Ok(()) => {
                        if failures > 0 {
                            info!("successfully updated services in catalog");
                            failures = 0;
                        }
                        self.desired.clear_explicitly_deregistered();
                        next_sync = Instant::now() + self.config.periodic_interval;
                    }
                    Err(e) => {
                        if failures == 0 {
                            warn!("failed to update services in catalog: {}", e);
                        } else if failures % 10 == 0 {
                            error!(
                                "still unable to update services in catalog after {} failures: {}",
                                failures, e
                            );
                        }
                        failures += 1;
                        let backoff = retry_backoff(
                            self.config.retry_interval,
                            self.config.max_retry_interval,
                            failures,
                        );
                        next_sync = Instant::now() + backoff;
                    }
                },

                RunEvent::Batch(Some(batch)) => self.merge_batch(batch),

                RunEvent::Shutdown | RunEvent::Batch(None) => {
                    // Exit only after draining and syncing outstanding batches
                    self.drain_ops();
                    match self.sync().await {
                        Ok(()) => self.desired.clear_explicitly_deregistered(),
                        Err(e) => warn!("final sync failed during shutdown: {}", e),
                    }
                    return;
                }
            }
        }
    }

    /// Merge every batch currently sitting in the op queue
    pub(crate) fn drain_ops(&mut self) {
        while let Ok(batch) = self.op_rx.try_recv() {
            self.merge_batch(batch);
        }
    }

    pub(crate) fn merge_batch(&mut self, batch: OpBatch) {
        self.desired.merge(batch);
        self.metrics
            .set_desired(self.desired.services.len(), self.desired.checks.len());
    }

    /// One reconciliation cycle: read the catalog, then remove strays,
    /// re-register changed or missing services, remove stray checks, and
    /// register missing checks, in that order. Aborts on the first
    /// non-tolerated error; the next cycle converges.
    pub(crate) async fn sync(&self) -> SyncResult<()> {
        let mut sreg = 0;
        let mut creg = 0;
        let mut sdereg = 0;
        let mut cdereg = 0;

        let catalog_services = self.catalog.services().await.map_err(|e| {
            self.metrics.incr_sync_failures();
            SyncError::Catalog(format!("error querying catalog services: {}", e))
        })?;

        let catalog_checks = self.catalog.checks().await.map_err(|e| {
            self.metrics.incr_sync_failures();
            SyncError::Catalog(format!("error querying catalog checks: {}", e))
        })?;

        let in_probation = Instant::now() < self.probation_deadline;

        // Remove managed services in the catalog but unknown locally
        for id in catalog_services.keys() {
            if self.desired.services.contains_key(id) {
                continue;
            }

            // Server agents never evict: a workload-host agent on the same
            // machine may own the entry
            if !ident::is_managed_service(id) || !self.role.is_workload_host() {
                continue;
            }

            // Unknown entries are spared during probation unless this
            // process removed them itself
            if in_probation && !self.desired.deregistered_services.contains(id) {
                continue;
            }

            // The catalog manages sidecar entries for desired parents
            if ident::is_sidecar(id, &self.desired.services) {
                continue;
            }

            if let Err(e) = self.catalog.deregister_service(id).await {
                if ident::is_legacy_service(id) {
                    debug!("failed to deregister legacy service {}: {}", id, e);
                    continue;
                }
                self.metrics.incr_sync_failures();
                return Err(e);
            }
            sdereg += 1;
            self.metrics.incr_service_deregistrations();
        }

        // Register desired services missing from the catalog or changed
        for (id, local) in &self.desired.services {
            if let Some(existing) = catalog_services.get(id) {
                if !service_update_required(local, existing) {
                    continue;
                }
            }

            if let Err(e) = self.catalog.register_service(local).await {
                self.metrics.incr_sync_failures();
                return Err(e);
            }
            sreg += 1;
            self.metrics.incr_service_registrations();
        }

        // Remove managed checks in the catalog but unknown locally
        for (id, check) in &catalog_checks {
            if self.desired.checks.contains_key(id) {
                continue;
            }

            if !ident::is_managed_service(&check.service_id)
                || !self.role.is_workload_host()
                || !ident::is_managed_check(id)
            {
                continue;
            }

            if in_probation && !self.desired.deregistered_checks.contains(id) {
                continue;
            }

            if ident::is_sidecar(&check.service_id, &self.desired.services) {
                continue;
            }

            if let Err(e) = self.catalog.deregister_check(id).await {
                if ident::is_legacy_service(&check.service_id) {
                    debug!("failed to deregister legacy check {}: {}", id, e);
                    continue;
                }
                self.metrics.incr_sync_failures();
                return Err(e);
            }
            cdereg += 1;
            self.metrics.incr_check_deregistrations();
        }

        // Register desired checks missing from the catalog
        for (id, check) in &self.desired.checks {
            if catalog_checks.contains_key(id) {
                continue;
            }

            if let Err(e) = self.catalog.register_check(check).await {
                self.metrics.incr_sync_failures();
                return Err(e);
            }
            creg += 1;
            self.metrics.incr_check_registrations();
        }

        if sreg > 0 || sdereg > 0 || creg > 0 || cdereg > 0 {
            debug!(
                "sync complete: registered_services={} deregistered_services={} registered_checks={} deregistered_checks={}",
                sreg, sdereg, creg, cdereg
            );
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn clear_explicitly_deregistered(&mut self) {
        self.desired.clear_explicitly_deregistered();
    }
}
