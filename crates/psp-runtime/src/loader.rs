//! Catalog and exempt-list resources
//!
//! A [`ResourceLoader`] hands back raw resource text; parsing and validation
//! happen here so every loader is held to the same schema. Every load runs
//! under a hard deadline.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use psp_core::{ExemptDomainList, ProviderCatalog};

use crate::error::LoadError;

/// The two remote resources the coordinator depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Catalog,
    ExemptDomains,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::ExemptDomains => "exempt domains",
        }
    }
}

/// Source of resource text.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn fetch(&self, resource: Resource) -> Result<String, LoadError>;
}

/// Run `fetch` under `timeout`.
pub async fn fetch_with_deadline(
    loader: &dyn ResourceLoader,
    resource: Resource,
    timeout: Duration,
) -> Result<String, LoadError> {
    match tokio::time::timeout(timeout, loader.fetch(resource)).await {
        Ok(result) => result,
        Err(_) => Err(LoadError::Timeout {
            resource: resource.as_str(),
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Fetch and validate the provider catalog.
pub async fn load_catalog(loader: &dyn ResourceLoader, timeout: Duration) -> Result<ProviderCatalog, LoadError> {
    let text = fetch_with_deadline(loader, Resource::Catalog, timeout).await?;
    let catalog = ProviderCatalog::from_json(&text)?;
    for (name, error) in catalog.pattern_failures() {
        log::warn!("provider '{}' has an unusable pattern and will match by tokens only: {}", name, error);
    }
    Ok(catalog)
}

/// Fetch the exempt-domain list.
pub async fn load_exempt_domains(loader: &dyn ResourceLoader, timeout: Duration) -> Result<ExemptDomainList, LoadError> {
    let text = fetch_with_deadline(loader, Resource::ExemptDomains, timeout).await?;
    ExemptDomainList::from_json(&text).map_err(LoadError::Exempt)
}

// =============================================================================
// Loaders
// =============================================================================

/// Whether a resource location is fetched over HTTP(S) rather than read from disk.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Routes each resource by its own location: URLs over HTTP(S), anything
/// else as a local path.
#[derive(Debug, Clone)]
pub struct LocationLoader {
    client: reqwest::Client,
    catalog: String,
    exempt: Option<String>,
}

impl LocationLoader {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            catalog: catalog.into(),
            exempt: None,
        }
    }

    pub fn with_exempt(mut self, location: impl Into<String>) -> Self {
        self.exempt = Some(location.into());
        self
    }
}

#[async_trait]
impl ResourceLoader for LocationLoader {
    async fn fetch(&self, resource: Resource) -> Result<String, LoadError> {
        let location = match resource {
            Resource::Catalog => Some(self.catalog.as_str()),
            Resource::ExemptDomains => self.exempt.as_deref(),
        }
        .ok_or(LoadError::NotConfigured(resource.as_str()))?;

        if is_remote(location) {
            get_text(&self.client, resource, location).await
        } else {
            read_text(location).await
        }
    }
}

async fn read_text(path: &str) -> Result<String, LoadError> {
    Ok(tokio::fs::read_to_string(path).await?)
}

async fn get_text(client: &reqwest::Client, resource: Resource, url: &str) -> Result<String, LoadError> {
    log::debug!("fetching {} from {}", resource.as_str(), url);
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

/// Serves resources from memory.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    resources: HashMap<Resource, String>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resource: Resource, text: impl Into<String>) -> Self {
        self.resources.insert(resource, text.into());
        self
    }
}

#[async_trait]
impl ResourceLoader for StaticLoader {
    async fn fetch(&self, resource: Resource) -> Result<String, LoadError> {
        self.resources
            .get(&resource)
            .cloned()
            .ok_or(LoadError::NotConfigured(resource.as_str()))
    }
}
