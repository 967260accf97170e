//! Check-watcher and restart-hook interfaces consumed by the reconciler

use crate::error::SyncResult;
use crate::types::LogicalCheck;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Restart hook invoked when a watched check stays unhealthy
#[async_trait]
pub trait Restarter: Send + Sync {
    /// Request a restart of the owning workload
    async fn restart(&self, reason: &str, failure: bool) -> SyncResult<()>;
}

/// Null restart hook for services that are not restartable through this
/// path, such as group services
pub struct NoopRestarter;

#[async_trait]
impl Restarter for NoopRestarter {
    async fn restart(&self, _reason: &str, _failure: bool) -> SyncResult<()> {
        Ok(())
    }
}

/// Watches registered checks and restarts workloads whose checks opted in
#[async_trait]
pub trait CheckWatcher: Send + Sync {
    /// Run the watcher until shutdown is signalled
    async fn run(&self, shutdown: broadcast::Receiver<()>);

    /// Start watching a check
    fn watch(
        &self,
        alloc_id: &str,
        task_name: &str,
        check_id: &str,
        check: &LogicalCheck,
        restarter: Arc<dyn Restarter>,
    );

    /// Stop watching a check
    fn unwatch(&self, check_id: &str);
}

/// Watcher that ignores every request; used when check-driven restarts are
/// handled elsewhere or disabled
pub struct NoopWatcher;

#[async_trait]
impl CheckWatcher for NoopWatcher {
    async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let _ = shutdown.recv().await;
    }

    fn watch(
        &self,
        _alloc_id: &str,
        _task_name: &str,
        _check_id: &str,
        _check: &LogicalCheck,
        _restarter: Arc<dyn Restarter>,
    ) {
    }

    fn unwatch(&self, _check_id: &str) {}
}
