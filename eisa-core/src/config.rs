//! Settings for the source and the pipeline.
//!
//! Values come from `eisa.toml`, then environment variables, then whatever
//! the caller (usually the CLI) overrides explicitly.

use crate::error::ConfigError;
use crate::pipeline::{FetchErrorPolicy, PipelineConfig};
use eisa_client::client::{DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS};
use eisa_client::{Credentials, EisaClient};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/eisa";
pub const CONFIG_FILE_NAME: &str = "eisa.toml";
pub const DEFAULT_PIPELINE_NAME: &str = "eisa";
pub const DEFAULT_DATASET_NAME: &str = "eisa_data";
pub const DEFAULT_EXPORT_SCHEMA_PATH: &str = "schemas/export";

pub const ENV_BASE_URL: &str = "EISA_BASE_URL";
pub const ENV_USERNAME: &str = "EISA_USERNAME";
pub const ENV_PASSWORD: &str = "EISA_PASSWORD";
pub const ENV_ACCESS_TOKEN: &str = "EISA_ACCESS_TOKEN";
pub const ENV_DATASET_NAME: &str = "EISA_DATASET_NAME";
pub const ENV_DATABASE: &str = "EISA_DATABASE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub source: SourceSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            access_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    pub pipeline_name: String,
    pub dataset_name: String,
    /// Database file; defaults to `<config dir>/<dataset_name>.db`.
    pub database: Option<String>,
    /// Directory for the exported schema. An empty string disables export.
    pub export_schema_path: String,
    pub on_fetch_error: FetchErrorPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pipeline_name: DEFAULT_PIPELINE_NAME.to_string(),
            dataset_name: DEFAULT_DATASET_NAME.to_string(),
            database: None,
            export_schema_path: DEFAULT_EXPORT_SCHEMA_PATH.to_string(),
            on_fetch_error: FetchErrorPolicy::Abort,
        }
    }
}

/// Expand `~` and environment references in a user supplied path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

pub fn default_config_dir() -> PathBuf {
    expand_path(DEFAULT_CONFIG_DIR)
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE_NAME)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Settings {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Like [`Settings::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Overlay environment variables, read through `lookup`. Empty values
    /// are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = non_empty(lookup(ENV_BASE_URL)) {
            self.source.base_url = Some(v);
        }
        if let Some(v) = non_empty(lookup(ENV_USERNAME)) {
            self.source.username = Some(v);
        }
        if let Some(v) = non_empty(lookup(ENV_PASSWORD)) {
            self.source.password = Some(v);
        }
        if let Some(v) = non_empty(lookup(ENV_ACCESS_TOKEN)) {
            self.source.access_token = Some(v);
        }
        if let Some(v) = non_empty(lookup(ENV_DATASET_NAME)) {
            self.pipeline.dataset_name = v;
        }
        if let Some(v) = non_empty(lookup(ENV_DATABASE)) {
            self.pipeline.database = Some(v);
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Bearer token wins over basic credentials; with neither, requests go
    /// out unauthenticated.
    pub fn credentials(&self) -> Credentials {
        if let Some(token) = non_empty(self.source.access_token.clone()) {
            Credentials::Bearer(token)
        } else if let Some(username) = non_empty(self.source.username.clone()) {
            Credentials::Basic {
                username,
                password: self.source.password.clone(),
            }
        } else {
            warn!("No EISA credentials configured, sending unauthenticated requests");
            Credentials::Anonymous
        }
    }

    pub fn base_url(&self) -> Result<&str, ConfigError> {
        self.source
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingBaseUrl)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "source.page_size".to_string(),
                value: "0".to_string(),
            });
        }
        if self.pipeline.dataset_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.dataset_name".to_string(),
                value: String::new(),
            });
        }
        Ok(())
    }

    pub fn client(&self) -> Result<EisaClient, ConfigError> {
        self.validate()?;
        let client =
            EisaClient::with_timeout(self.base_url()?, self.credentials(), self.source.timeout_secs)?
                .with_page_size(self.source.page_size);
        Ok(client)
    }

    pub fn database_path(&self) -> PathBuf {
        match self.pipeline.database {
            Some(ref path) => expand_path(path),
            None => default_config_dir().join(format!("{}.db", self.pipeline.dataset_name)),
        }
    }

    pub fn export_schema_path(&self) -> Option<PathBuf> {
        let path = self.pipeline.export_schema_path.trim();
        if path.is_empty() {
            None
        } else {
            Some(expand_path(path))
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            pipeline_name: self.pipeline.pipeline_name.clone(),
            dataset_name: self.pipeline.dataset_name.clone(),
            database: self.database_path(),
            export_schema_path: self.export_schema_path(),
            on_fetch_error: self.pipeline.on_fetch_error,
        }
    }
}
