//! Sync orchestration: read the bookmark feed, then import it into the Podio app.

mod config;
mod error;
mod schema;
mod writer;

use bmsync_core::ImportSummary;
use bmsync_feed::FeedReader;
use bmsync_podio::{AppId, PodioClient, RemoteStore};
use bmsync_storage::{FeedFetcher, HttpFetcher};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub use config::{ConfigFile, PodioSection, SyncConfig, DEFAULT_CONFIG_PATH, DEFAULT_PODIO_ENDPOINT};
pub use error::{FailureKind, SyncError};
pub use schema::{FieldSchema, SchemaMappingError, NOTES_LABEL, TITLE_LABEL, URL_LABEL};
pub use writer::ImportWriter;

pub const CRATE_NAME: &str = "bmsync-sync";

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub feed_url: String,
    pub app_id: AppId,
    pub bookmarks_read: usize,
    pub import: ImportSummary,
}

pub struct SyncPipeline {
    config: SyncConfig,
    fetcher: Box<dyn FeedFetcher>,
    remote: Box<dyn RemoteStore>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self, SyncError> {
        let http = config.http_client_config();
        let fetcher = HttpFetcher::new(http.clone())
            .map_err(|e| SyncError::Config(format!("feed http client: {e:#}")))?;
        let remote = PodioClient::new(config.podio.clone(), &http)
            .map_err(|e| SyncError::Config(format!("podio client: {e:#}")))?;
        Ok(Self::with_parts(config, Box::new(fetcher), Box::new(remote)))
    }

    /// Builds a pipeline over caller-supplied collaborators.
    pub fn with_parts(
        config: SyncConfig,
        fetcher: Box<dyn FeedFetcher>,
        remote: Box<dyn RemoteStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            remote,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, app_id = %self.config.app_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<SyncRunSummary, SyncError> {
        let started_at = Utc::now();
        let feed_url = self.config.feed_url.as_str();

        let bookmarks = FeedReader::new(self.fetcher.as_ref()).read(feed_url).await?;
        let import = ImportWriter::new(self.remote.as_ref(), self.config.app_id)
            .write(&bookmarks)
            .await?;

        let finished_at = Utc::now();
        info!(
            read = bookmarks.len(),
            created = import.created,
            skipped = import.skipped,
            "sync complete"
        );

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            feed_url: feed_url.to_string(),
            app_id: self.config.app_id,
            bookmarks_read: bookmarks.len(),
            import,
        })
    }
}

pub async fn run_sync_once(config: SyncConfig) -> Result<SyncRunSummary, SyncError> {
    SyncPipeline::new(config)?.run_once().await
}
