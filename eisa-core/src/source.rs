use crate::error::LoadError;
use eisa_client::{ApiError, EisaClient, Record};
use futures::Stream;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use url::Url;

pub const SOURCE_NAME: &str = "eisa";

/// Every EISA resource is keyed by the survey response id.
pub const PRIMARY_KEY: &str = "ResponseID";

/// A loadable resource: one catalog entry bound to its fetch parameters.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub url: Url,
    pub params: Vec<(String, String)>,
    pub primary_key: String,
}

impl Resource {
    /// Build the resource for a catalog entry.
    pub fn new(client: &EisaClient, name: &str, catalog_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            name: name.to_string(),
            url: client.resource_url(catalog_url)?,
            params: client.default_params(catalog_url),
            primary_key: PRIMARY_KEY.to_string(),
        })
    }

    /// Flattened records, fetched lazily as the stream is polled.
    pub fn records<'a>(
        &self,
        client: &'a EisaClient,
    ) -> impl Stream<Item = Result<Record, ApiError>> + 'a {
        client.records(self.url.clone(), self.params.clone())
    }
}

/// A catalog entry that could not be turned into a resource.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedResource {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Source {
    name: String,
    resources: Vec<Resource>,
    skipped: Vec<SkippedResource>,
}

impl Source {
    pub fn from_catalog(client: &EisaClient, catalog: BTreeMap<String, String>) -> Self {
        let mut resources = Vec::new();
        let mut skipped = Vec::new();

        for (name, url) in catalog {
            match Resource::new(client, &name, &url) {
                Ok(resource) => resources.push(resource),
                Err(e) => {
                    warn!("Skipping resource {}: {}", name, e);
                    skipped.push(SkippedResource {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Self {
            name: SOURCE_NAME.to_string(),
            resources,
            skipped,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn skipped(&self) -> &[SkippedResource] {
        &self.skipped
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Keep only the named resources. An empty selection keeps everything.
    pub fn with_resources(mut self, names: &[String]) -> Result<Self, LoadError> {
        if names.is_empty() {
            return Ok(self);
        }
        if let Some(unknown) = names.iter().find(|n| self.resource(n).is_none()) {
            return Err(LoadError::UnknownResource(unknown.clone()));
        }
        self.resources.retain(|r| names.contains(&r.name));
        Ok(self)
    }
}

/// Discover the catalog and build one resource per entry.
///
/// Discovery failures abort; entries that cannot be built are skipped with a
/// warning and listed in [`Source::skipped`].
pub async fn eisa_source(client: &EisaClient) -> Result<Source, ApiError> {
    let catalog = client.get_resources().await?;
    let source = Source::from_catalog(client, catalog);
    info!(
        "Available resources: {:?} ({} skipped)",
        source.resource_names(),
        source.skipped().len()
    );
    Ok(source)
}
