//! Configuration for the catalog reconciler

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the reconciler loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How quickly to retry syncing after an error, scaled by the number of
    /// consecutive failures
    pub retry_interval: Duration,

    /// Upper bound on the retry backoff
    pub max_retry_interval: Duration,

    /// Interval between periodic reconciliations while healthy
    pub periodic_interval: Duration,

    /// How long shutdown blocks waiting for enqueued operations to sync
    pub shutdown_wait: Duration,

    /// Extra time added to a script check's interval when setting its TTL
    pub ttl_check_buffer: Duration,

    /// Initial window during which unknown catalog entries are preserved
    pub probation_window: Duration,

    /// Depth of the operation queue between producers and the reconciler
    pub op_queue_depth: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_retry_interval: Duration::from_secs(30),
            periodic_interval: Duration::from_secs(30),
            shutdown_wait: Duration::from_secs(60),
            ttl_check_buffer: Duration::from_secs(1),
            probation_window: Duration::from_secs(60),
            op_queue_depth: 8,
        }
    }
}

/// Configuration for the catalog agent HTTP client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base address of the catalog agent
    pub address: String,

    /// Optional ACL token sent with every request
    pub token: Option<String>,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:8500".to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}
