//! skiff-catalog - Service-catalog reconciler for the skiff workload agent
//!
//! Mirrors the agent's desired service registrations into an external
//! service-catalog agent over its HTTP control plane, keeping the two in
//! eventual agreement despite concurrent mutations, transient failures,
//! restarts, and out-of-band drift.

pub mod address;
pub mod catalog;
pub mod check;
pub mod config;
pub mod error;
pub mod ident;
pub mod metrics;
pub mod ops;
pub mod reconciler;
pub mod registration;
pub mod sync;
pub mod types;
pub mod watch;

/// Crate version
pub const SYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export the main types for convenience
pub use catalog::{CatalogApi, HttpCatalog};
pub use config::{CatalogConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use metrics::MetricsSnapshot;
pub use reconciler::Reconciler;
pub use registration::ServiceHandle;
pub use sync::{AllocRegistration, CatalogSync, TaskRegistration};
pub use types::*;
pub use watch::{CheckWatcher, NoopRestarter, NoopWatcher, Restarter};
