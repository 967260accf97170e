//! In-memory catalog agent used by unit tests

use crate::catalog::{CatalogApi, CatalogCheck, CatalogService, CheckRegistration, ServiceRegistration};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Counters for catalog writes observed by the mock
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteCounts {
    pub service_registers: usize,
    pub service_deregisters: usize,
    pub check_registers: usize,
    pub check_deregisters: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize {
        self.service_registers
            + self.service_deregisters
            + self.check_registers
            + self.check_deregisters
    }
}

#[derive(Default)]
struct Inner {
    services: HashMap<String, CatalogService>,
    checks: HashMap<String, CatalogCheck>,
    service_regs: HashMap<String, ServiceRegistration>,
    check_regs: HashMap<String, CheckRegistration>,
    counts: WriteCounts,
    ttl_updates: Vec<(String, String, String)>,
    fail_all: bool,
    fail_deregister: HashSet<String>,
}

/// In-memory catalog with write counting and failure injection
#[derive(Default)]
pub struct MockCatalog {
    inner: Mutex<Inner>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation until turned off again
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().fail_all = failing;
    }

    /// Fail deregistration of one specific id
    pub fn fail_deregister(&self, id: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_deregister
            .insert(id.to_string());
    }

    /// Seed a service entry as if registered by a previous process
    pub fn seed_service(&self, id: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.services.insert(
            id.to_string(),
            CatalogService {
                id: id.to_string(),
                service: name.to_string(),
                ..Default::default()
            },
        );
    }

    /// Seed a check entry as if registered by a previous process
    pub fn seed_check(&self, id: &str, service_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.checks.insert(
            id.to_string(),
            CatalogCheck {
                check_id: id.to_string(),
                service_id: service_id.to_string(),
                ..Default::default()
            },
        );
    }

    pub fn counts(&self) -> WriteCounts {
        self.inner.lock().unwrap().counts.clone()
    }

    pub fn reset_counts(&self) {
        self.inner.lock().unwrap().counts = WriteCounts::default();
    }

    pub fn has_service(&self, id: &str) -> bool {
        self.inner.lock().unwrap().services.contains_key(id)
    }

    pub fn has_check(&self, id: &str) -> bool {
        self.inner.lock().unwrap().checks.contains_key(id)
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().services.keys().cloned().collect()
    }

    /// The last registration written for a service id
    pub fn service_registration(&self, id: &str) -> Option<ServiceRegistration> {
        self.inner.lock().unwrap().service_regs.get(id).cloned()
    }

    /// The last registration written for a check id
    pub fn check_registration(&self, id: &str) -> Option<CheckRegistration> {
        self.inner.lock().unwrap().check_regs.get(id).cloned()
    }

    pub fn ttl_updates(&self) -> Vec<(String, String, String)> {
        self.inner.lock().unwrap().ttl_updates.clone()
    }

    fn check_failing(inner: &Inner) -> SyncResult<()> {
        if inner.fail_all {
            return Err(SyncError::Catalog("mock catalog failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogApi for MockCatalog {
    async fn services(&self) -> SyncResult<HashMap<String, CatalogService>> {
        let inner = self.inner.lock().unwrap();
        Self::check_failing(&inner)?;
        Ok(inner.services.clone())
    }

    async fn checks(&self) -> SyncResult<HashMap<String, CatalogCheck>> {
        let inner = self.inner.lock().unwrap();
        Self::check_failing(&inner)?;
        Ok(inner.checks.clone())
    }

    async fn register_service(&self, reg: &ServiceRegistration) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failing(&inner)?;
        inner.counts.service_registers += 1;
        inner.services.insert(
            reg.id.clone(),
            CatalogService {
                id: reg.id.clone(),
                service: reg.name.clone(),
                tags: reg.tags.clone(),
                address: reg.address.clone(),
                port: reg.port,
                meta: reg.meta.clone(),
                kind: reg.kind.clone(),
            },
        );
        inner.service_regs.insert(reg.id.clone(), reg.clone());
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failing(&inner)?;
        if inner.fail_deregister.contains(service_id) {
            return Err(SyncError::Catalog(format!(
                "mock deregister failure for {}",
                service_id
            )));
        }
        inner.counts.service_deregisters += 1;
        inner.services.remove(service_id);
        inner.service_regs.remove(service_id);
        Ok(())
    }

    async fn register_check(&self, reg: &CheckRegistration) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failing(&inner)?;
        inner.counts.check_registers += 1;
        inner.checks.insert(
            reg.id.clone(),
            CatalogCheck {
                check_id: reg.id.clone(),
                name: reg.name.clone(),
                status: reg.status.clone(),
                service_id: reg.service_id.clone(),
                output: String::new(),
            },
        );
        inner.check_regs.insert(reg.id.clone(), reg.clone());
        Ok(())
    }

    async fn deregister_check(&self, check_id: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failing(&inner)?;
        if inner.fail_deregister.contains(check_id) {
            return Err(SyncError::Catalog(format!(
                "mock deregister failure for {}",
                check_id
            )));
        }
        inner.counts.check_deregisters += 1;
        inner.checks.remove(check_id);
        inner.check_regs.remove(check_id);
        Ok(())
    }

    async fn update_ttl(&self, check_id: &str, output: &str, status: &str) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_failing(&inner)?;
        inner.ttl_updates.push((
            check_id.to_string(),
            output.to_string(),
            status.to_string(),
        ));
        Ok(())
    }

    async fn agent_self(&self) -> SyncResult<()> {
        let inner = self.inner.lock().unwrap();
        Self::check_failing(&inner)?;
        Ok(())
    }
}
