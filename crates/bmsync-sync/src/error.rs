use bmsync_feed::{FeedError, ParseError};
use bmsync_podio::RemoteError;
use bmsync_storage::FetchError;
use thiserror::Error;

use crate::schema::SchemaMappingError;

/// Coarse failure class, stable enough for schedulers to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Config,
    FeedFetch,
    FeedParse,
    SchemaMapping,
    RemoteStore,
}

impl FailureKind {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Config => 2,
            Self::FeedFetch => 3,
            Self::FeedParse => 4,
            Self::SchemaMapping => 5,
            Self::RemoteStore => 6,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("fetching feed {url}: {source}")]
    FeedFetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("parsing feed: {0}")]
    FeedParse(#[from] ParseError),
    #[error(transparent)]
    SchemaMapping(#[from] SchemaMappingError),
    #[error("remote store call {operation} failed: {source}")]
    RemoteStore {
        operation: String,
        #[source]
        source: RemoteError,
    },
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) => FailureKind::Config,
            Self::FeedFetch { .. } => FailureKind::FeedFetch,
            Self::FeedParse(_) => FailureKind::FeedParse,
            Self::SchemaMapping(_) => FailureKind::SchemaMapping,
            Self::RemoteStore { .. } => FailureKind::RemoteStore,
        }
    }

    pub(crate) fn remote(operation: impl Into<String>) -> impl FnOnce(RemoteError) -> Self {
        let operation = operation.into();
        move |source| Self::RemoteStore { operation, source }
    }
}

impl From<FeedError> for SyncError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Fetch { url, source } => Self::FeedFetch { url, source },
            FeedError::Parse(err) => Self::FeedParse(err),
        }
    }
}
