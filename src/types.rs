//! Workload-side types for the catalog reconciler

use crate::error::{SyncError, SyncResult};
use crate::ident;
use crate::watch::{NoopRestarter, Restarter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Role of the agent process owning this reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Client,
    Server,
}

impl AgentRole {
    /// Wire name of the role, used in agent service ids
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Client => "client",
            AgentRole::Server => "server",
        }
    }

    /// Whether this agent hosts workloads and may evict stray entries
    pub fn is_workload_host(&self) -> bool {
        matches!(self, AgentRole::Client)
    }
}

/// How the advertised address of a service or check is chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    #[default]
    Auto,
    Host,
    Driver,
}

impl AddressMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressMode::Auto => "auto",
            AddressMode::Host => "host",
            AddressMode::Driver => "driver",
        }
    }
}

/// A named port reserved on a network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port label referenced by services and checks
    pub label: String,

    /// Host-visible port value
    pub value: u16,

    /// Target port inside the workload's network namespace
    pub to: u16,
}

/// A network allocated to a workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkResource {
    /// IP address of the network
    pub ip: String,

    /// Named ports reserved on this network
    pub ports: Vec<PortMapping>,
}

impl NetworkResource {
    /// Look up a reserved port by label
    pub fn port(&self, label: &str) -> Option<&PortMapping> {
        self.ports.iter().find(|p| p.label == label)
    }

    /// Port labels mapped to their host-visible values
    pub fn port_labels(&self) -> HashMap<String, u16> {
        self.ports
            .iter()
            .map(|p| (p.label.clone(), p.value))
            .collect()
    }
}

/// Network as reported by the workload driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverNetwork {
    /// IP address inside the driver network
    pub ip: String,

    /// Whether the driver asked for its address to be advertised
    pub auto_advertise: bool,

    /// Port labels mapped to ports inside the driver network
    pub port_map: HashMap<String, u16>,
}

/// Kind of a logical health check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    #[default]
    Http,
    Tcp,
    Script,
    Grpc,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Http => "http",
            CheckKind::Tcp => "tcp",
            CheckKind::Script => "script",
            CheckKind::Grpc => "grpc",
        }
    }

    /// Whether the catalog requires an address for this kind
    pub fn requires_port(&self) -> bool {
        !matches!(self, CheckKind::Script)
    }
}

/// Restart policy attached to a check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRestart {
    /// Consecutive failures tolerated before a restart is requested
    pub limit: u32,

    /// Grace period after a restart before failures count again
    pub grace: Duration,

    /// Whether warning statuses count as healthy
    pub ignore_warnings: bool,
}

/// A logical health check attached to a service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogicalCheck {
    /// Check name
    pub name: String,

    /// Check kind
    pub kind: CheckKind,

    /// HTTP path, resolved against the service address
    pub path: String,

    /// HTTP scheme, defaults to "http"
    pub protocol: String,

    /// HTTP method
    pub method: String,

    /// HTTP headers
    pub headers: HashMap<String, Vec<String>>,

    /// Port label, defaults to the service's port label
    pub port_label: String,

    /// Address mode, defaults to host
    pub address_mode: Option<AddressMode>,

    /// Interval between check executions
    pub interval: Duration,

    /// Timeout for a single execution
    pub timeout: Duration,

    /// Initial status reported to the catalog
    pub initial_status: String,

    /// Skip TLS certificate verification
    pub tls_skip_verify: bool,

    /// gRPC service to probe
    pub grpc_service: String,

    /// Use TLS for the gRPC probe
    pub grpc_use_tls: bool,

    /// Restart policy; restart knobs are not part of the check identity
    pub restart: Option<CheckRestart>,
}

impl LogicalCheck {
    /// Whether an unhealthy result should restart the workload
    pub fn triggers_restarts(&self) -> bool {
        self.restart.as_ref().map(|r| r.limit > 0).unwrap_or(false)
    }

    /// Content hash identifying this check under the given service id.
    ///
    /// Restart fields are excluded so tuning a restart policy never forces
    /// the catalog entry to be replaced.
    pub fn fingerprint(&self, service_id: &str) -> String {
        let mut parts: Vec<String> = vec![
            service_id.to_string(),
            self.name.clone(),
            self.kind.as_str().to_string(),
            self.path.clone(),
            self.protocol.clone(),
            self.method.clone(),
            self.port_label.clone(),
            self.address_mode.map(|m| m.as_str()).unwrap_or("").to_string(),
            self.interval.as_millis().to_string(),
            self.timeout.as_millis().to_string(),
            self.tls_skip_verify.to_string(),
            self.grpc_service.clone(),
            self.grpc_use_tls.to_string(),
        ];

        let mut header_keys: Vec<&String> = self.headers.keys().collect();
        header_keys.sort();
        for key in header_keys {
            parts.push(format!("{}={}", key, self.headers[key].join(",")));
        }

        ident::fingerprint(parts.iter().map(String::as_str))
    }
}

/// Sidecar proxy upstream declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    /// Name of the destination service
    pub destination_name: String,

    /// Local port the proxy binds for this upstream
    pub local_bind_port: u16,
}

/// Sidecar proxy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySpec {
    /// Opaque proxy configuration passed through to the catalog
    pub config: serde_json::Map<String, serde_json::Value>,

    /// Upstream services the proxy connects to
    pub upstreams: Vec<Upstream>,
}

/// Sidecar declaration on a connect-enabled service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidecarSpec {
    /// Proxy settings, if any were declared
    pub proxy: Option<ProxySpec>,
}

/// Connect declaration on a service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectSpec {
    /// The service speaks the mesh protocol natively
    pub native: bool,

    /// Sidecar proxy to register alongside the service
    pub sidecar: Option<SidecarSpec>,
}

/// A service as declared on a workload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogicalService {
    /// Service name
    pub name: String,

    /// Label of the port to advertise
    pub port_label: String,

    /// Address mode used to resolve the advertised address
    pub address_mode: AddressMode,

    /// Tags attached to the registration
    pub tags: Vec<String>,

    /// Tags used instead of `tags` while the workload is a canary
    pub canary_tags: Vec<String>,

    /// Metadata attached to the registration
    pub meta: HashMap<String, String>,

    /// Health checks attached to the service
    pub checks: Vec<LogicalCheck>,

    /// Connect declaration, if the service joins the mesh
    pub connect: Option<ConnectSpec>,
}

impl LogicalService {
    /// Content hash of the service registration under the given owner.
    ///
    /// Checks are excluded; they are diffed id-by-id so a check edit never
    /// forces the service itself to be replaced.
    pub fn content_hash(&self, alloc_id: &str, task_name: &str, canary: bool) -> String {
        let mut parts: Vec<String> = vec![
            alloc_id.to_string(),
            task_name.to_string(),
            canary.to_string(),
            self.name.clone(),
            self.port_label.clone(),
            self.address_mode.as_str().to_string(),
            self.tags.join("\u{1f}"),
            self.canary_tags.join("\u{1f}"),
        ];

        let mut meta_keys: Vec<&String> = self.meta.keys().collect();
        meta_keys.sort();
        for key in meta_keys {
            parts.push(format!("{}={}", key, self.meta[key]));
        }

        if let Some(connect) = &self.connect {
            // serde_json maps are ordered, so this is deterministic
            parts.push(serde_json::to_string(connect).unwrap_or_default());
        }

        ident::fingerprint(parts.iter().map(String::as_str))
    }
}

/// The services of one workload task, as handed to the lifecycle API
#[derive(Clone)]
pub struct WorkloadServices {
    /// Allocation the task belongs to
    pub alloc_id: String,

    /// Task name; group services use a synthetic `group-<name>` task
    pub task_name: String,

    /// Services declared on the task
    pub services: Vec<LogicalService>,

    /// Networks allocated to the task
    pub networks: Vec<NetworkResource>,

    /// Network reported by the driver, if any
    pub driver_network: Option<DriverNetwork>,

    /// Whether the allocation is a canary deployment
    pub canary: bool,

    /// Restart hook invoked when a watched check turns unhealthy
    pub restarter: Arc<dyn Restarter>,
}

/// The services of an allocation's task group
#[derive(Clone)]
pub struct GroupServices {
    /// Allocation id
    pub alloc_id: String,

    /// Task group name
    pub task_group: String,

    /// Services declared at group level
    pub services: Vec<LogicalService>,

    /// Networks shared by the group
    pub networks: Vec<NetworkResource>,

    /// Whether the allocation is a canary deployment
    pub canary: bool,
}

impl GroupServices {
    /// Model the group as a synthetic task so it flows through the same
    /// registration path as task services.
    ///
    /// Group services are not restartable through this path, so the restart
    /// hook is the no-op null object.
    pub fn to_workload(&self) -> SyncResult<WorkloadServices> {
        let network = self.networks.first().ok_or_else(|| {
            SyncError::Validation(format!(
                "cannot register group service for {:?} without a group network",
                self.task_group
            ))
        })?;

        Ok(WorkloadServices {
            alloc_id: self.alloc_id.clone(),
            task_name: format!("group-{}", self.task_group),
            services: self.services.clone(),
            networks: self.networks.clone(),
            driver_network: Some(DriverNetwork {
                ip: network.ip.clone(),
                auto_advertise: true,
                port_map: network.port_labels(),
            }),
            canary: self.canary,
            restarter: Arc::new(NoopRestarter),
        })
    }
}
