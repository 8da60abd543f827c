use crate::destination::{Destination, LoadStatus, TableWriter};
use crate::error::LoadError;
use crate::schema::SchemaSnapshot;
use crate::source::{Resource, SkippedResource, Source};
use chrono::{DateTime, Utc};
use eisa_client::EisaClient;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::pin::pin;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Options for a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub pipeline_name: String,
    pub dataset_name: String,
    pub database: PathBuf,
    pub export_schema_path: Option<PathBuf>,
    pub on_fetch_error: FetchErrorPolicy,
}

/// What to do when a page request fails halfway through a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchErrorPolicy {
    /// Roll the resource back and report it as failed
    #[default]
    Abort,
    /// Keep what was fetched so far and report the resource as truncated
    Truncate,
}

impl FetchErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorPolicy::Abort => "abort",
            FetchErrorPolicy::Truncate => "truncate",
        }
    }
}

impl FromStr for FetchErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(FetchErrorPolicy::Abort),
            "truncate" => Ok(FetchErrorPolicy::Truncate),
            other => Err(format!(
                "unknown fetch error policy '{}' (expected abort or truncate)",
                other
            )),
        }
    }
}

impl fmt::Display for FetchErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceStatus {
    Loaded,
    Truncated { reason: String },
    Failed { reason: String },
}

/// Outcome of loading one resource
#[derive(Debug, Clone, Serialize)]
pub struct ResourceLoad {
    pub name: String,
    pub records: usize,
    #[serde(flatten)]
    pub status: ResourceStatus,
}

impl ResourceLoad {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: 0,
            status: ResourceStatus::Loaded,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ResourceStatus::Failed { .. })
    }
}

/// Summary of a finished pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct LoadInfo {
    pub pipeline_name: String,
    pub dataset_name: String,
    pub load_id: String,
    pub destination: PathBuf,
    pub status: LoadStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub resources: Vec<ResourceLoad>,
    pub skipped: Vec<SkippedResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<PathBuf>,
}

impl LoadInfo {
    pub fn total_records(&self) -> usize {
        self.resources.iter().map(|r| r.records).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.resources.iter().any(ResourceLoad::is_failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ResourceLoad> {
        self.resources.iter().filter(|r| r.is_failed())
    }
}

/// Progress events emitted while a run is in flight
#[derive(Debug, Clone)]
pub enum LoadProgress {
    ResourceStarted { resource: String },
    RecordsLoaded { resource: String, records: usize },
    ResourceFinished(ResourceLoad),
}

/// Callback for reporting load progress
pub type LoadProgressCallback = Arc<dyn Fn(&LoadProgress) + Send + Sync>;

/// How often, in records, a `RecordsLoaded` event is emitted.
const PROGRESS_EVERY: usize = 50;

fn overall_status(resources: &[ResourceLoad]) -> LoadStatus {
    let failed = resources.iter().filter(|r| r.is_failed()).count();
    let loaded = resources
        .iter()
        .filter(|r| r.status == ResourceStatus::Loaded)
        .count();

    if loaded == resources.len() {
        LoadStatus::Completed
    } else if failed == resources.len() {
        LoadStatus::Failed
    } else {
        LoadStatus::Partial
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    destination: Destination,
}

impl Pipeline {
    /// Open (or create) the destination database described by `config`.
    pub fn new(config: PipelineConfig) -> Result<Self, LoadError> {
        if let Some(parent) = config.database.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let destination = Destination::open(&config.database)?;
        Ok(Self {
            config,
            destination,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Load every resource of `source`, one after another.
    ///
    /// A resource that fails is rolled back and reported; it never stops the
    /// remaining resources. Only database or export errors outside a resource
    /// abort the run.
    pub async fn run(
        &mut self,
        client: &EisaClient,
        source: &Source,
        progress: Option<LoadProgressCallback>,
    ) -> Result<LoadInfo, LoadError> {
        let started_at = Utc::now();
        let load_id = self
            .destination
            .begin_load(&self.config.pipeline_name, &self.config.dataset_name)?;
        info!(
            "Starting load {} of {} resources into {}",
            load_id,
            source.resources().len(),
            self.config.database.display()
        );

        let mut resources = Vec::new();
        for resource in source.resources() {
            if let Some(ref callback) = progress {
                callback(&LoadProgress::ResourceStarted {
                    resource: resource.name.clone(),
                });
            }

            let outcome = self
                .load_resource(client, resource, &load_id, progress.as_ref())
                .await;

            if let Some(ref callback) = progress {
                callback(&LoadProgress::ResourceFinished(outcome.clone()));
            }
            resources.push(outcome);
        }

        let status = overall_status(&resources);
        self.destination.finish_load(&load_id, status)?;

        let schema_path = match self.config.export_schema_path {
            Some(ref dir) => {
                let tables: Vec<&str> = source.resource_names();
                let snapshot = SchemaSnapshot::from_destination(
                    &self.destination,
                    &self.config.pipeline_name,
                    &tables,
                )?;
                Some(snapshot.export(dir)?)
            }
            None => None,
        };

        let info = LoadInfo {
            pipeline_name: self.config.pipeline_name.clone(),
            dataset_name: self.config.dataset_name.clone(),
            load_id,
            destination: self.config.database.clone(),
            status,
            started_at,
            finished_at: Utc::now(),
            resources,
            skipped: source.skipped().to_vec(),
            schema_path,
        };
        info!(
            "Load {} finished: {} ({} records)",
            info.load_id,
            info.status.as_str(),
            info.total_records()
        );
        Ok(info)
    }

    async fn load_resource(
        &mut self,
        client: &EisaClient,
        resource: &Resource,
        load_id: &str,
        progress: Option<&LoadProgressCallback>,
    ) -> ResourceLoad {
        let mut outcome = ResourceLoad::new(&resource.name);

        if let Err(e) = self
            .write_resource(client, resource, load_id, progress, &mut outcome)
            .await
        {
            warn!("Failed to load resource {}: {}", resource.name, e);
            outcome.records = 0;
            outcome.status = ResourceStatus::Failed {
                reason: e.to_string(),
            };
        }
        outcome
    }

    /// Stream one resource into its table inside a single transaction.
    /// Returning early drops the transaction, which rolls it back.
    async fn write_resource(
        &mut self,
        client: &EisaClient,
        resource: &Resource,
        load_id: &str,
        progress: Option<&LoadProgressCallback>,
        outcome: &mut ResourceLoad,
    ) -> Result<(), LoadError> {
        let policy = self.config.on_fetch_error;
        let tx = self.destination.transaction()?;
        let mut writer = TableWriter::new(&tx, &resource.name, &resource.primary_key, load_id)?;

        let mut records = pin!(resource.records(client));
        while let Some(item) = records.next().await {
            match item {
                Ok(record) => {
                    writer.write(&record)?;
                    outcome.records = writer.written();
                    if outcome.records % PROGRESS_EVERY == 0
                        && let Some(callback) = progress
                    {
                        callback(&LoadProgress::RecordsLoaded {
                            resource: resource.name.clone(),
                            records: outcome.records,
                        });
                    }
                }
                Err(e) if policy == FetchErrorPolicy::Truncate => {
                    warn!(
                        "Truncating resource {} after {} records: {}",
                        resource.name, outcome.records, e
                    );
                    outcome.status = ResourceStatus::Truncated {
                        reason: e.to_string(),
                    };
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        drop(writer);
        tx.commit()?;
        info!("Loaded {} records into {}", outcome.records, resource.name);
        Ok(())
    }
}
