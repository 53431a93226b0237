//! Run configuration: a YAML file merged with `BMSYNC_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bmsync_podio::{AppId, PodioCredentials};
use bmsync_storage::HttpClientConfig;
use serde::Deserialize;

use crate::error::SyncError;

pub const DEFAULT_CONFIG_PATH: &str = "bmsync.yaml";
pub const DEFAULT_PODIO_ENDPOINT: &str = "podio.com";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub feed_url: Option<String>,
    pub app_id: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub podio: PodioSection,
}

#[derive(Clone, Default, Deserialize)]
pub struct PodioSection {
    pub endpoint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for PodioSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodioSection")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ConfigFile {
    pub fn from_yaml_str(text: &str) -> Result<Self, SyncError> {
        serde_yaml::from_str(text).map_err(|e| SyncError::Config(format!("invalid yaml: {e}")))
    }

    pub fn read(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("reading {}: {e}", path.display())))?;
        serde_yaml::from_str(&text)
            .map_err(|e| SyncError::Config(format!("invalid yaml in {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub feed_url: String,
    pub app_id: AppId,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub podio: PodioCredentials,
}

fn required(value: Option<String>, name: &str) -> Result<String, SyncError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SyncError::Config(format!("missing required setting {name}")))
}

impl SyncConfig {
    /// Loads `path`, or `bmsync.yaml` when it exists, then applies the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        let file = match path {
            Some(path) => ConfigFile::read(path)?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    ConfigFile::read(&default_path)?
                } else {
                    ConfigFile::default()
                }
            }
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Environment values win over file values.
    pub fn from_sources(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SyncError> {
        let app_id = match env("BMSYNC_APP_ID") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                SyncError::Config(format!("BMSYNC_APP_ID is not a numeric app id: {raw}"))
            })?),
            None => file.app_id,
        }
        .ok_or_else(|| SyncError::Config("missing required setting app_id".to_string()))?;

        let podio = file.podio;
        let credentials = PodioCredentials {
            endpoint: env("BMSYNC_PODIO_ENDPOINT")
                .or(podio.endpoint)
                .unwrap_or_else(|| DEFAULT_PODIO_ENDPOINT.to_string()),
            client_id: required(
                env("BMSYNC_PODIO_CLIENT_ID").or(podio.client_id),
                "podio.client_id",
            )?,
            client_secret: required(
                env("BMSYNC_PODIO_CLIENT_SECRET").or(podio.client_secret),
                "podio.client_secret",
            )?,
            username: required(
                env("BMSYNC_PODIO_USERNAME").or(podio.username),
                "podio.username",
            )?,
            password: required(
                env("BMSYNC_PODIO_PASSWORD").or(podio.password),
                "podio.password",
            )?,
        };

        Ok(Self {
            feed_url: required(env("BMSYNC_FEED_URL").or(file.feed_url), "feed_url")?,
            app_id: AppId(app_id),
            http_timeout_secs: file.http_timeout_secs.unwrap_or(20),
            user_agent: file
                .user_agent
                .unwrap_or_else(|| format!("bmsync/{}", env!("CARGO_PKG_VERSION"))),
            podio: credentials,
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}
