//! Public lifecycle API of the catalog reconciler

use crate::catalog::CatalogApi;
use crate::check::build_check_registration;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::ident;
use crate::metrics::{MetricsSnapshot, SyncMetrics};
use crate::ops::OpBatch;
use crate::reconciler::Reconciler;
use crate::registration::{
    build_check_op, build_service_ops, build_service_registration, ServiceHandle,
};
use crate::types::{
    AgentRole, CheckKind, GroupServices, LogicalService, WorkloadServices,
};
use crate::watch::CheckWatcher;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{error, info};

/// Registrations of one allocation, by task name
#[derive(Debug, Clone, Default)]
pub struct AllocRegistration {
    /// Task name to its registered services and checks
    pub tasks: HashMap<String, TaskRegistration>,
}

impl AllocRegistration {
    /// Copy carrying only the registration ids
    fn stripped(&self) -> Self {
        Self {
            tasks: self
                .tasks
                .iter()
                .map(|(name, task)| (name.clone(), task.stripped()))
                .collect(),
        }
    }

    /// Number of services the catalog reported for this allocation
    pub fn num_services(&self) -> usize {
        self.tasks
            .values()
            .flat_map(|t| t.services.values())
            .filter(|h| h.service.is_some())
            .count()
    }

    /// Number of checks the catalog reported for this allocation
    pub fn num_checks(&self) -> usize {
        self.tasks
            .values()
            .flat_map(|t| t.services.values())
            .map(|h| h.checks.len())
            .sum()
    }
}

/// Registrations of one task
#[derive(Debug, Clone, Default)]
pub struct TaskRegistration {
    /// Service id to its handle
    pub services: HashMap<String, ServiceHandle>,
}

impl TaskRegistration {
    fn stripped(&self) -> Self {
        Self {
            services: self
                .services
                .iter()
                .map(|(id, handle)| (id.clone(), handle.stripped()))
                .collect(),
        }
    }
}

/// Registrations owned by the agent process itself, torn down on shutdown
#[derive(Default)]
struct AgentEntries {
    services: HashSet<String>,
    checks: HashSet<String>,
}

/// Handle exposing the lifecycle API to the rest of the agent.
///
/// All registration operations are asynchronous by contract: a successful
/// return guarantees the batch is enqueued, not that the catalog has been
/// updated. The paired [`Reconciler`] applies batches and converges the
/// catalog in the background.
#[derive(Clone)]
pub struct CatalogSync {
    catalog: Arc<dyn CatalogApi>,
    watcher: Arc<dyn CheckWatcher>,
    config: SyncConfig,
    op_tx: mpsc::Sender<OpBatch>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
    seen: Arc<AtomicBool>,
    metrics: Arc<SyncMetrics>,
    alloc_registrations: Arc<RwLock<HashMap<String, AllocRegistration>>>,
    agent: Arc<Mutex<AgentEntries>>,
}

impl CatalogSync {
    /// Create the API handle and its reconciler. The reconciler must be
    /// driven on its own task: `tokio::spawn(reconciler.run())`.
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        watcher: Arc<dyn CheckWatcher>,
        role: AgentRole,
        config: SyncConfig,
    ) -> (Self, Reconciler) {
        let (op_tx, op_rx) = mpsc::channel(config.op_queue_depth.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutting_down = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(SyncMetrics::new());

        let reconciler = Reconciler::new(
            catalog.clone(),
            watcher.clone(),
            config.clone(),
            role,
            op_rx,
            shutdown_tx.clone(),
            shutting_down.clone(),
            seen.clone(),
            metrics.clone(),
        );

        let sync = Self {
            catalog,
            watcher,
            config,
            op_tx,
            shutdown_tx,
            shutting_down,
            seen,
            metrics,
            alloc_registrations: Arc::new(RwLock::new(HashMap::new())),
            agent: Arc::new(Mutex::new(AgentEntries::default())),
        };

        (sync, reconciler)
    }

    /// Whether the catalog agent has ever been reached
    pub fn has_seen(&self) -> bool {
        self.seen.load(Ordering::SeqCst)
    }

    /// Current sync metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Deliver a batch to the reconciler, or drop it silently if shutdown
    /// has started
    async fn commit(&self, ops: OpBatch) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            result = self.op_tx.send(ops) => {
                // A closed queue means the reconciler already exited
                let _ = result;
            }
            _ = shutdown_rx.recv() => {}
        }
    }

    /// Register services for the agent process itself.
    ///
    /// Agent services do not use port labels; the label carries a literal
    /// `host:port`. Script checks are not supported. The resulting entries
    /// are deregistered on shutdown.
    pub async fn register_agent(
        &self,
        role: AgentRole,
        services: &[LogicalService],
    ) -> SyncResult<()> {
        let mut ops = OpBatch::new();

        for service in services {
            let id = ident::agent_service_id(role, service);

            let (host, port) = split_host_port(&service.port_label).map_err(|reason| {
                SyncError::Validation(format!(
                    "error parsing port label {:?} from service {:?}: {}",
                    service.port_label, service.name, reason
                ))
            })?;

            ops.reg_services.push(crate::catalog::ServiceRegistration {
                id: id.clone(),
                name: service.name.clone(),
                tags: service.tags.clone(),
                address: host.clone(),
                port,
                meta: HashMap::from([(
                    ident::SOURCE_META_KEY.to_string(),
                    ident::SOURCE_TAG.to_string(),
                )]),
                kind: None,
                connect: None,
            });

            for check in &service.checks {
                if check.kind == CheckKind::Script {
                    return Err(SyncError::Validation(format!(
                        "service {:?} contains invalid check: agent checks do not support scripts",
                        service.name
                    )));
                }

                let (check_host, check_port) = if check.port_label.is_empty() {
                    (host.clone(), port)
                } else {
                    split_host_port(&check.port_label).map_err(|reason| {
                        SyncError::Validation(format!(
                            "error parsing port label {:?} from check {:?}: {}",
                            check.port_label, check.name, reason
                        ))
                    })?
                };

                let check_id = ident::check_id(&id, check);
                let reg = build_check_registration(
                    &id,
                    &check_id,
                    check,
                    &check_host,
                    check_port,
                    self.config.ttl_check_buffer,
                )?;
                ops.reg_checks.push(reg);
            }
        }

        // Serialized with shutdown so no agent entry can leak past teardown
        let mut agent = self.agent.lock().await;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let service_ids: Vec<String> = ops.reg_services.iter().map(|s| s.id.clone()).collect();
        let check_ids: Vec<String> = ops.reg_checks.iter().map(|c| c.id.clone()).collect();

        self.commit(ops).await;

        agent.services.extend(service_ids);
        agent.checks.extend(check_ids);
        Ok(())
    }

    /// Register all services and checks of a workload task
    pub async fn register_workload(&self, workload: &WorkloadServices) -> SyncResult<()> {
        if workload.services.is_empty() {
            return Ok(());
        }

        let mut ops = OpBatch::new();
        let mut task_reg = TaskRegistration::default();

        for service in &workload.services {
            let handle =
                build_service_ops(&mut ops, service, workload, self.config.ttl_check_buffer)?;
            task_reg.services.insert(handle.service_id.clone(), handle);
        }

        self.add_task_registration(&workload.alloc_id, &workload.task_name, task_reg)
            .await;
        self.commit(ops).await;

        // Watches are installed only after every op built successfully, so
        // a failure partway through cannot leak watches
        for service in &workload.services {
            let service_id =
                ident::task_service_id(&workload.alloc_id, &workload.task_name, service);
            self.watch_service_checks(workload, &service_id, service);
        }
        Ok(())
    }

    /// Update a workload's registrations in place.
    ///
    /// The service is not touched when only its checks changed; checks are
    /// diffed id-by-id so unchanged checks are left alone.
    pub async fn update_workload(
        &self,
        old: &WorkloadServices,
        new: &WorkloadServices,
    ) -> SyncResult<()> {
        let mut ops = OpBatch::new();
        let mut task_reg = TaskRegistration::default();

        let existing: HashMap<String, &LogicalService> = old
            .services
            .iter()
            .map(|s| (ident::task_service_id(&old.alloc_id, &old.task_name, s), s))
            .collect();
        let updated: HashMap<String, &LogicalService> = new
            .services
            .iter()
            .map(|s| (ident::task_service_id(&new.alloc_id, &new.task_name, s), s))
            .collect();

        for (existing_id, existing_svc) in &existing {
            let Some(new_svc) = updated.get(existing_id) else {
                // Service removed: drop it and all of its checks
                ops.dereg_services.push(existing_id.clone());
                for check in &existing_svc.checks {
                    let cid = ident::check_id(existing_id, check);
                    ops.dereg_checks.push(cid.clone());
                    if check.triggers_restarts() {
                        self.watcher.unwatch(&cid);
                    }
                }
                continue;
            };

            // Only re-register the service itself when its content changed
            let unchanged = existing_svc.content_hash(&old.alloc_id, &old.task_name, old.canary)
                == new_svc.content_hash(&new.alloc_id, &new.task_name, new.canary);
            if !unchanged {
                ops.reg_services
                    .push(build_service_registration(new_svc, new)?);
            }

            let mut handle = ServiceHandle::new(existing_id.clone());

            let mut existing_checks: HashMap<String, &crate::types::LogicalCheck> = existing_svc
                .checks
                .iter()
                .map(|c| (ident::check_id(existing_id, c), c))
                .collect();

            for check in &new_svc.checks {
                let cid = ident::check_id(existing_id, check);
                if existing_checks.remove(&cid).is_some() {
                    // Check kept as-is; nothing to register
                    handle.check_ids.insert(cid.clone());
                } else {
                    // Check newly present on a kept service
                    let cid = build_check_op(
                        &mut ops,
                        existing_id,
                        check,
                        new_svc,
                        new,
                        self.config.ttl_check_buffer,
                    )?;
                    handle.check_ids.insert(cid);
                }

                // Refresh watches on kept checks: restart knobs are outside
                // the check id
                if check.triggers_restarts() {
                    self.watcher.watch(
                        &new.alloc_id,
                        &new.task_name,
                        &ident::check_id(existing_id, check),
                        check,
                        new.restarter.clone(),
                    );
                }
            }

            // Checks no longer present on the updated service
            for (cid, check) in existing_checks {
                ops.dereg_checks.push(cid.clone());
                if check.triggers_restarts() {
                    self.watcher.unwatch(&cid);
                }
            }

            task_reg.services.insert(existing_id.clone(), handle);
        }

        // Brand-new services register the same way as in register_workload
        for (id, new_svc) in &updated {
            if existing.contains_key(id) {
                continue;
            }
            let handle =
                build_service_ops(&mut ops, new_svc, new, self.config.ttl_check_buffer)?;
            task_reg.services.insert(handle.service_id.clone(), handle);
        }

        self.add_task_registration(&new.alloc_id, &new.task_name, task_reg)
            .await;
        self.commit(ops).await;

        for (id, new_svc) in &updated {
            if !existing.contains_key(id) {
                self.watch_service_checks(new, id, new_svc);
            }
        }
        Ok(())
    }

    /// Remove all services and checks of a workload task
    pub async fn remove_workload(&self, workload: &WorkloadServices) {
        let mut ops = OpBatch::new();

        for service in &workload.services {
            let id = ident::task_service_id(&workload.alloc_id, &workload.task_name, service);
            ops.dereg_services.push(id.clone());

            for check in &service.checks {
                let cid = ident::check_id(&id, check);
                ops.dereg_checks.push(cid.clone());

                if check.triggers_restarts() {
                    self.watcher.unwatch(&cid);
                }
            }
        }

        self.remove_task_registration(&workload.alloc_id, &workload.task_name)
            .await;
        self.commit(ops).await;
    }

    /// Register an allocation's group-level services
    pub async fn register_group(&self, group: &GroupServices) -> SyncResult<()> {
        if group.services.is_empty() {
            return Ok(());
        }
        self.register_workload(&group.to_workload()?).await
    }

    /// Update an allocation's group-level services
    pub async fn update_group(&self, old: &GroupServices, new: &GroupServices) -> SyncResult<()> {
        self.update_workload(&old.to_workload()?, &new.to_workload()?)
            .await
    }

    /// Remove an allocation's group-level services
    pub async fn remove_group(&self, group: &GroupServices) -> SyncResult<()> {
        if group.services.is_empty() {
            return Ok(());
        }
        self.remove_workload(&group.to_workload()?).await;
        Ok(())
    }

    /// Registrations for one allocation, materialized with the catalog's
    /// current view. Returns `None` for an unknown allocation.
    pub async fn alloc_registrations(
        &self,
        alloc_id: &str,
    ) -> SyncResult<Option<AllocRegistration>> {
        // Snapshot the ids under the read lock; query the catalog outside it
        let mut reg = {
            let regs = self.alloc_registrations.read().await;
            match regs.get(alloc_id) {
                Some(reg) => reg.stripped(),
                None => return Ok(None),
            }
        };

        let services = self.catalog.services().await?;
        let checks = self.catalog.checks().await?;

        for task in reg.tasks.values_mut() {
            for handle in task.services.values_mut() {
                handle.service = services.get(&handle.service_id).cloned();
                handle.checks = handle
                    .check_ids
                    .iter()
                    .filter_map(|id| checks.get(id).cloned())
                    .collect();
            }
        }

        Ok(Some(reg))
    }

    /// Report a TTL check result straight to the catalog; not queued
    pub async fn update_ttl(&self, check_id: &str, output: &str, status: &str) -> SyncResult<()> {
        self.catalog.update_ttl(check_id, output, status).await
    }

    /// Shut the reconciler down. Idempotent.
    ///
    /// Blocks up to the configured shutdown wait for enqueued operations to
    /// sync, then tears down agent-owned entries best effort.
    pub async fn shutdown(&self) -> SyncResult<()> {
        // Serialized with register_agent so no agent entry can leak
        let agent = self.agent.lock().await;

        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(());

        info!("catalog sync shutting down");

        // Give the run loop time to drain, but don't block indefinitely
        let _ = tokio::time::timeout(self.config.shutdown_wait, self.op_tx.closed()).await;

        // If the catalog was never seen nothing could have been written
        if !self.has_seen() {
            return Ok(());
        }

        // Always attempt to deregister agent entries, even past the deadline
        for id in &agent.services {
            if let Err(e) = self.catalog.deregister_service(id).await {
                error!("failed deregistering agent service {}: {}", id, e);
            }
        }
        for id in &agent.checks {
            if let Err(e) = self.catalog.deregister_check(id).await {
                error!("failed deregistering agent check {}: {}", id, e);
            }
        }

        Ok(())
    }

    fn watch_service_checks(
        &self,
        workload: &WorkloadServices,
        service_id: &str,
        service: &LogicalService,
    ) {
        for check in &service.checks {
            if check.triggers_restarts() {
                let check_id = ident::check_id(service_id, check);
                self.watcher.watch(
                    &workload.alloc_id,
                    &workload.task_name,
                    &check_id,
                    check,
                    workload.restarter.clone(),
                );
            }
        }
    }

    async fn add_task_registration(&self, alloc_id: &str, task_name: &str, reg: TaskRegistration) {
        let mut regs = self.alloc_registrations.write().await;
        regs.entry(alloc_id.to_string())
            .or_default()
            .tasks
            .insert(task_name.to_string(), reg);
    }

    async fn remove_task_registration(&self, alloc_id: &str, task_name: &str) {
        let mut regs = self.alloc_registrations.write().await;
        if let Some(alloc) = regs.get_mut(alloc_id) {
            alloc.tasks.remove(task_name);
            if alloc.tasks.is_empty() {
                regs.remove(alloc_id);
            }
        }
    }
}

/// Split a literal `host:port` label
fn split_host_port(label: &str) -> Result<(String, u16), String> {
    let (host, port) = label
        .rsplit_once(':')
        .ok_or_else(|| format!("address {:?} missing port", label))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port in address {:?}", label))?;
    Ok((host.to_string(), port))
}
