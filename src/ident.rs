//! Identity scheme for catalog registrations
//!
//! Ids are the only correlation key between the local desired state and the
//! catalog, so they must be stable across restarts: a restored workload must
//! compute the same ids and reclaim its existing catalog entries.

use crate::catalog::ServiceRegistration;
use crate::types::{AgentRole, LogicalCheck, LogicalService};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Prefix scoping every registration owned by this subsystem
pub const SERVICE_PREFIX: &str = "_skiff";

/// Prefix scoping workload task services
pub const TASK_PREFIX: &str = "_skiff-task-";

/// Prefix scoping check registrations
pub const CHECK_PREFIX: &str = "_skiff-check-";

/// Prefix used by pre-0.7 releases for task services
const LEGACY_TASK_PREFIX: &str = "_skiff-executor";

/// Suffix the catalog appends to the sidecar proxy of a mesh service
pub const SIDECAR_SUFFIX: &str = "-sidecar-proxy";

/// Metadata key attributing a registration to its source system
pub const SOURCE_META_KEY: &str = "external-source";

/// Metadata value identifying this agent as the source
pub const SOURCE_TAG: &str = "skiff";

/// Deterministic short hash over an ordered sequence of fields
pub(crate) fn fingerprint<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// Id of a service registered for the agent itself.
///
/// Example: `_skiff-client-5c3b8e6a10f29d4b9f3e0c7d1a2b4f68`
pub fn agent_service_id(role: AgentRole, service: &LogicalService) -> String {
    format!(
        "{}-{}-{}",
        SERVICE_PREFIX,
        role.as_str(),
        service.content_hash(role.as_str(), "", false)
    )
}

/// Id of a service registered for a workload task.
///
/// Example: `_skiff-task-b4e61df9-b095-d64e-f241-23860da1375f-redis-web-http`
pub fn task_service_id(alloc_id: &str, task_name: &str, service: &LogicalService) -> String {
    format!(
        "{}{}-{}-{}-{}",
        TASK_PREFIX, alloc_id, task_name, service.name, service.port_label
    )
}

/// Id of a check owned by the given service id
pub fn check_id(service_id: &str, check: &LogicalCheck) -> String {
    format!("{}{}", CHECK_PREFIX, check.fingerprint(service_id))
}

/// Whether an id is a workload service managed by this subsystem, in the
/// current or legacy form. Agent service ids return false: independent
/// client and server agents may share a host and must not evict each other.
pub fn is_managed_service(id: &str) -> bool {
    id.starts_with(TASK_PREFIX) || is_legacy_service(id)
}

/// Whether an id uses the legacy pre-0.7 task service form
pub fn is_legacy_service(id: &str) -> bool {
    id.starts_with(LEGACY_TASK_PREFIX)
}

/// Whether an id is a check managed by this subsystem
pub fn is_managed_check(id: &str) -> bool {
    id.starts_with(CHECK_PREFIX)
}

/// Whether an id belongs to the sidecar proxy of a still-desired service
pub fn is_sidecar(id: &str, desired: &HashMap<String, ServiceRegistration>) -> bool {
    let Some(parent) = id.strip_suffix(SIDECAR_SUFFIX) else {
        return false;
    };
    desired.contains_key(parent)
}
