use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::AzpipesError;

/// Configuration file structure for azpipes.
///
/// Holds the fixed organization/repository identity, polling behaviour and
/// the pipelines triggered for each service. Secrets never live here; they
/// come from the environment (see [`crate::auth::Secrets`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Azure DevOps and identity settings
    #[serde(default)]
    pub azure: AzureSettings,

    /// Poll interval and retry behaviour
    #[serde(default)]
    pub polling: PollingConfig,

    /// Pipelines to trigger, keyed by service name
    #[serde(default = "default_pipelines")]
    pub pipelines: IndexMap<String, ServicePipelines>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AzureSettings {
    /// Pipelines API root, `{base-url}/{pipeline-id}/runs` is the trigger endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// OAuth2 authority, the tenant is appended to it
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// Value of the `api-version` query parameter sent with every API call
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Scope requested in the client-credentials grant
    #[serde(default = "default_scope")]
    pub scope: String,

    /// GitHub repository checked out as the `common` resource at the PR merge ref
    #[serde(default = "default_repository")]
    pub common_repository: String,

    /// Repository reported back through the `NOTIFY_GITHUB_REPOSITORY` variable
    #[serde(default = "default_repository")]
    pub notify_repository: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollingConfig {
    /// Seconds to wait between status polls
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Give up after this many in-progress polls (unbounded when unset)
    #[serde(default)]
    pub max_polls: Option<u32>,

    /// Retries after the first attempt of a failing API call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit in milliseconds; retry `n` sleeps `n` units
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
}

/// Pipeline ids for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServicePipelines {
    pub build: u64,
    pub pr: u64,
    pub branch: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            azure: AzureSettings::default(),
            polling: PollingConfig::default(),
            pipelines: default_pipelines(),
        }
    }
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_url: default_login_url(),
            api_version: default_api_version(),
            scope: default_scope(),
            common_repository: default_repository(),
            notify_repository: default_repository(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_polls: None,
            max_attempts: default_max_attempts(),
            backoff_millis: default_backoff_millis(),
        }
    }
}

fn default_base_url() -> String {
    "https://dev.azure.com/NHSD-APIM/API Platform/_apis/pipelines".to_string()
}

fn default_login_url() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_api_version() -> String {
    "6.0-preview.1".to_string()
}

fn default_scope() -> String {
    "https://app.vssps.visualstudio.com/.default".to_string()
}

fn default_repository() -> String {
    "NHSDigital/api-management-utils".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_millis() -> u64 {
    500
}

fn default_pipelines() -> IndexMap<String, ServicePipelines> {
    IndexMap::from([(
        "canary-api".to_string(),
        ServicePipelines {
            build: 222,
            pr: 223,
            branch: "refs/heads/main".to_string(),
        },
    )])
}

impl AzureSettings {
    /// Checks that both endpoints are absolute URLs.
    pub fn validate(&self) -> crate::error::Result<()> {
        Url::parse(&self.base_url)
            .map_err(|e| AzpipesError::Config(format!("Invalid base URL: {e}")))?;
        Url::parse(&self.login_url)
            .map_err(|e| AzpipesError::Config(format!("Invalid login URL: {e}")))?;
        Ok(())
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_millis)
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./azpipes.toml
    /// 3. ./azpipes.json
    /// 4. ./azpipes.yaml
    /// 5. ./azpipes.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["azpipes.toml", "azpipes.json", "azpipes.yaml", "azpipes.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        let config: Self = match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            _ => toml::from_str(&contents)
                .map_err(anyhow::Error::from)
                .or_else(|_| serde_json::from_str(&contents).map_err(anyhow::Error::from))
                .or_else(|_| serde_yaml::from_str(&contents).map_err(anyhow::Error::from))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        config.azure.validate()?;
        Ok(config)
    }
}
