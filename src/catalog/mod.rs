//! Catalog agent API: wire types and the consumed client interface

pub mod http;
#[cfg(test)]
pub mod mock;

use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use http::HttpCatalog;

/// Upstream entry on a sidecar proxy registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRegistration {
    #[serde(rename = "DestinationName")]
    pub destination_name: String,

    #[serde(rename = "LocalBindPort")]
    pub local_bind_port: u16,
}

/// Proxy block embedded in a sidecar registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyRegistration {
    #[serde(rename = "Config", default)]
    pub config: serde_json::Map<String, serde_json::Value>,

    #[serde(rename = "Upstreams", default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<UpstreamRegistration>,
}

/// Sidecar service embedded in a connect block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SidecarRegistration {
    #[serde(rename = "Address")]
    pub address: String,

    #[serde(rename = "Port")]
    pub port: u16,

    #[serde(rename = "Proxy", skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyRegistration>,
}

/// Connect block on a service registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectRegistration {
    #[serde(rename = "Native")]
    pub native: bool,

    #[serde(rename = "SidecarService", skip_serializing_if = "Option::is_none")]
    pub sidecar_service: Option<Box<SidecarRegistration>>,
}

/// A desired service registration, as written to the catalog agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,

    #[serde(rename = "Address")]
    pub address: String,

    #[serde(rename = "Port")]
    pub port: u16,

    #[serde(rename = "Meta", default)]
    pub meta: HashMap<String, String>,

    #[serde(rename = "Kind", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(rename = "Connect", skip_serializing_if = "Option::is_none")]
    pub connect: Option<ConnectRegistration>,
}

/// A desired check registration, as written to the catalog agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRegistration {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "ServiceID")]
    pub service_id: String,

    #[serde(rename = "Status", skip_serializing_if = "String::is_empty", default)]
    pub status: String,

    #[serde(rename = "Timeout")]
    pub timeout: String,

    /// Empty for script checks; the catalog rejects TTL + interval together
    #[serde(rename = "Interval", skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,

    #[serde(rename = "Method", skip_serializing_if = "String::is_empty", default)]
    pub method: String,

    #[serde(rename = "Header", default, skip_serializing_if = "HashMap::is_empty")]
    pub header: HashMap<String, Vec<String>>,

    #[serde(rename = "TLSSkipVerify", default)]
    pub tls_skip_verify: bool,

    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,

    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,

    #[serde(rename = "GRPC", skip_serializing_if = "Option::is_none")]
    pub grpc: Option<String>,

    #[serde(rename = "GRPCUseTLS", default)]
    pub grpc_use_tls: bool,
}

/// A service as read back from the catalog agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogService {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Service")]
    pub service: String,

    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,

    #[serde(rename = "Address", default)]
    pub address: String,

    #[serde(rename = "Port", default)]
    pub port: u16,

    #[serde(rename = "Meta", default)]
    pub meta: HashMap<String, String>,

    #[serde(rename = "Kind", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A check as read back from the catalog agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogCheck {
    #[serde(rename = "CheckID")]
    pub check_id: String,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Status", default)]
    pub status: String,

    #[serde(rename = "ServiceID", default)]
    pub service_id: String,

    #[serde(rename = "Output", default)]
    pub output: String,
}

/// Whether a desired registration differs from what the catalog holds.
///
/// Tag comparison is order-sensitive: reordering tags is a change.
pub fn service_update_required(reg: &ServiceRegistration, svc: &CatalogService) -> bool {
    !(reg.kind == svc.kind
        && reg.id == svc.id
        && reg.port == svc.port
        && reg.address == svc.address
        && reg.name == svc.service
        && reg.tags == svc.tags)
}

/// Operations the reconciler needs from the catalog agent.
///
/// All operations are synchronous requests against the agent's HTTP control
/// plane and may fail with transport errors.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// All services registered with the agent, keyed by id
    async fn services(&self) -> SyncResult<HashMap<String, CatalogService>>;

    /// All checks registered with the agent, keyed by id
    async fn checks(&self) -> SyncResult<HashMap<String, CatalogCheck>>;

    /// Register or update a service
    async fn register_service(&self, reg: &ServiceRegistration) -> SyncResult<()>;

    /// Deregister a service by id
    async fn deregister_service(&self, service_id: &str) -> SyncResult<()>;

    /// Register or update a check
    async fn register_check(&self, reg: &CheckRegistration) -> SyncResult<()>;

    /// Deregister a check by id
    async fn deregister_check(&self, check_id: &str) -> SyncResult<()>;

    /// Report the result of a TTL check
    async fn update_ttl(&self, check_id: &str, output: &str, status: &str) -> SyncResult<()>;

    /// Cheap read used to probe that the agent is reachable
    async fn agent_self(&self) -> SyncResult<()>;
}
