//! HTTP client for the catalog agent control plane

use crate::catalog::{CatalogApi, CatalogCheck, CatalogService, CheckRegistration, ServiceRegistration};
use crate::config::CatalogConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Catalog agent client speaking the agent's HTTP API
pub struct HttpCatalog {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl HttpCatalog {
    /// Create a new catalog client
    pub fn new(config: &CatalogConfig) -> SyncResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Catalog(format!("failed to build HTTP client: {}", e)))?;

        // Ensure the address has a scheme
        let base_url = if config.address.starts_with("http://")
            || config.address.starts_with("https://")
        {
            config.address.clone()
        } else {
            format!("http://{}", config.address)
        };

        Ok(Self {
            http_client,
            base_url,
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    /// Make an authenticated GET request against the agent API
    async fn get(&self, path: &str) -> SyncResult<reqwest::Response> {
        let mut request = self.http_client.get(self.url(path));
        if let Some(ref token) = self.token {
            request = request.header("X-Consul-Token", token);
        }

        let response = request.send().await?;
        Self::check_status(path, response).await
    }

    /// Make an authenticated PUT request against the agent API
    async fn put<T: Serialize>(&self, path: &str, body: Option<&T>) -> SyncResult<()> {
        let mut request = self.http_client.put(self.url(path));
        if let Some(ref token) = self.token {
            request = request.header("X-Consul-Token", token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::check_status(path, response).await?;
        Ok(())
    }

    async fn check_status(
        path: &str,
        response: reqwest::Response,
    ) -> SyncResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(SyncError::Catalog(format!(
            "catalog request {} failed: HTTP {} - {}",
            path, status, body
        )))
    }
}

#[async_trait]
impl CatalogApi for HttpCatalog {
    async fn services(&self) -> SyncResult<HashMap<String, CatalogService>> {
        let response = self.get("/agent/services").await?;
        let services: HashMap<String, CatalogService> = response.json().await?;
        debug!("Read {} services from catalog", services.len());
        Ok(services)
    }

    async fn checks(&self) -> SyncResult<HashMap<String, CatalogCheck>> {
        let response = self.get("/agent/checks").await?;
        let checks: HashMap<String, CatalogCheck> = response.json().await?;
        debug!("Read {} checks from catalog", checks.len());
        Ok(checks)
    }

    async fn register_service(&self, reg: &ServiceRegistration) -> SyncResult<()> {
        self.put("/agent/service/register", Some(reg)).await
    }

    async fn deregister_service(&self, service_id: &str) -> SyncResult<()> {
        self.put::<()>(&format!("/agent/service/deregister/{}", service_id), None)
            .await
    }

    async fn register_check(&self, reg: &CheckRegistration) -> SyncResult<()> {
        self.put("/agent/check/register", Some(reg)).await
    }

    async fn deregister_check(&self, check_id: &str) -> SyncResult<()> {
        self.put::<()>(&format!("/agent/check/deregister/{}", check_id), None)
            .await
    }

    async fn update_ttl(&self, check_id: &str, output: &str, status: &str) -> SyncResult<()> {
        let body = serde_json::json!({
            "Output": output,
            "Status": status,
        });
        self.put(&format!("/agent/check/update/{}", check_id), Some(&body))
            .await
    }

    async fn agent_self(&self) -> SyncResult<()> {
        self.get("/agent/self").await?;
        Ok(())
    }
}
