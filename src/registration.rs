//! Translation of workload services into catalog registration operations

use crate::address::resolve_address;
use crate::catalog::{
    CatalogCheck, CatalogService, ConnectRegistration, ProxyRegistration, ServiceRegistration,
    SidecarRegistration, UpstreamRegistration,
};
use crate::check::build_check_registration;
use crate::error::{SyncError, SyncResult};
use crate::ident;
use crate::ops::OpBatch;
use crate::types::{AddressMode, CheckKind, LogicalService, NetworkResource, WorkloadServices};
use std::collections::HashSet;
use std::time::Duration;

/// Handle to a registered service: the ids written to the catalog, plus the
/// catalog's own view of them once materialized by a query
#[derive(Debug, Clone, Default)]
pub struct ServiceHandle {
    /// Id of the service registration
    pub service_id: String,

    /// Ids of the service's check registrations
    pub check_ids: HashSet<String>,

    /// The service as the catalog reports it, if queried
    pub service: Option<CatalogService>,

    /// The checks as the catalog reports them, if queried
    pub checks: Vec<CatalogCheck>,
}

impl ServiceHandle {
    pub fn new(service_id: String) -> Self {
        Self {
            service_id,
            ..Default::default()
        }
    }

    /// Copy carrying only the ids, so callers never see a stale
    /// materialized view
    pub(crate) fn stripped(&self) -> Self {
        Self {
            service_id: self.service_id.clone(),
            check_ids: self.check_ids.clone(),
            service: None,
            checks: Vec::new(),
        }
    }
}

/// Build the catalog registration for one workload service, without its
/// checks
pub(crate) fn build_service_registration(
    service: &LogicalService,
    workload: &WorkloadServices,
) -> SyncResult<ServiceRegistration> {
    let id = ident::task_service_id(&workload.alloc_id, &workload.task_name, service);

    let (ip, port) = resolve_address(
        service.address_mode,
        &service.port_label,
        &workload.networks,
        workload.driver_network.as_ref(),
    )
    .map_err(|e| {
        SyncError::Validation(format!(
            "unable to get address for service {:?}: {}",
            service.name, e
        ))
    })?;

    // Canary deployments swap in the canary tag set
    let tags = if workload.canary && !service.canary_tags.is_empty() {
        service.canary_tags.clone()
    } else {
        service.tags.clone()
    };

    let connect = build_connect(service, &workload.networks)?;

    let mut meta = service.meta.clone();
    // Lets the catalog UI attribute the registration to this agent
    meta.insert(
        ident::SOURCE_META_KEY.to_string(),
        ident::SOURCE_TAG.to_string(),
    );

    Ok(ServiceRegistration {
        id,
        name: service.name.clone(),
        tags,
        address: ip,
        port,
        meta,
        kind: None,
        connect,
    })
}

/// Append register ops for one service and its checks, returning the handle
/// with the service and check ids populated
pub(crate) fn build_service_ops(
    ops: &mut OpBatch,
    service: &LogicalService,
    workload: &WorkloadServices,
    ttl_buffer: Duration,
) -> SyncResult<ServiceHandle> {
    let reg = build_service_registration(service, workload)?;
    let id = reg.id.clone();
    let mut handle = ServiceHandle::new(id.clone());
    ops.reg_services.push(reg);

    for check in &service.checks {
        let check_id = build_check_op(ops, &id, check, service, workload, ttl_buffer)?;
        handle.check_ids.insert(check_id);
    }

    Ok(handle)
}

/// Append a register op for one check, returning its id
pub(crate) fn build_check_op(
    ops: &mut OpBatch,
    service_id: &str,
    check: &crate::types::LogicalCheck,
    service: &LogicalService,
    workload: &WorkloadServices,
    ttl_buffer: Duration,
) -> SyncResult<String> {
    let check_id = ident::check_id(service_id, check);

    if check.kind == CheckKind::Script {
        // Script checks heartbeat over the TTL endpoint; no address needed
        let reg = build_check_registration(service_id, &check_id, check, "", 0, ttl_buffer)
            .map_err(|e| {
                SyncError::Validation(format!(
                    "failed to add script check {:?}: {}",
                    check.name, e
                ))
            })?;
        ops.reg_checks.push(reg);
        return Ok(check_id);
    }

    // Default to the service's port label but allow the check to override
    let port_label = if check.port_label.is_empty() {
        &service.port_label
    } else {
        &check.port_label
    };

    // Check addresses default to host mode for backward compatibility
    let mode = check.address_mode.unwrap_or(AddressMode::Host);

    let (ip, port) = resolve_address(
        mode,
        port_label,
        &workload.networks,
        workload.driver_network.as_ref(),
    )
    .map_err(|e| {
        SyncError::Validation(format!(
            "error getting address for check {:?}: {}",
            check.name, e
        ))
    })?;

    let reg = build_check_registration(service_id, &check_id, check, &ip, port, ttl_buffer)
        .map_err(|e| {
            SyncError::Validation(format!("failed to add check {:?}: {}", check.name, e))
        })?;
    ops.reg_checks.push(reg);

    Ok(check_id)
}

/// Build the connect block for a mesh-enabled service.
///
/// Returns `None` when the service has no connect declaration.
fn build_connect(
    service: &LogicalService,
    networks: &[NetworkResource],
) -> SyncResult<Option<ConnectRegistration>> {
    let Some(spec) = &service.connect else {
        return Ok(None);
    };

    let mut cc = ConnectRegistration {
        native: spec.native,
        sidecar_service: None,
    };

    let Some(sidecar) = &spec.sidecar else {
        return Ok(Some(cc));
    };

    let (network, port) = connect_port(&service.name, networks)?;

    // Bind inside the network namespace, advertise the host address
    let mut config = sidecar
        .proxy
        .as_ref()
        .map(|p| p.config.clone())
        .unwrap_or_default();
    config.insert(
        "bind_address".to_string(),
        serde_json::Value::String("0.0.0.0".to_string()),
    );
    config.insert("bind_port".to_string(), serde_json::Value::from(port.to));

    let upstreams = sidecar
        .proxy
        .as_ref()
        .map(|p| {
            p.upstreams
                .iter()
                .map(|u| UpstreamRegistration {
                    destination_name: u.destination_name.clone(),
                    local_bind_port: u.local_bind_port,
                })
                .collect()
        })
        .unwrap_or_default();

    cc.sidecar_service = Some(Box::new(SidecarRegistration {
        address: network.ip.clone(),
        port: port.value,
        proxy: Some(ProxyRegistration { config, upstreams }),
    }));

    Ok(Some(cc))
}

/// The network and port reserved for a service's sidecar proxy
fn connect_port<'a>(
    service_name: &str,
    networks: &'a [NetworkResource],
) -> SyncResult<(&'a NetworkResource, &'a crate::types::PortMapping)> {
    if networks.len() != 1 {
        return Err(SyncError::Validation(format!(
            "connect is only supported with exactly 1 network (found {})",
            networks.len()
        )));
    }

    let port = networks[0].port(service_name).ok_or_else(|| {
        SyncError::Validation(format!(
            "no connect port defined for service {:?}",
            service_name
        ))
    })?;

    Ok((&networks[0], port))
}
