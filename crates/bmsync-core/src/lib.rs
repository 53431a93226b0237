//! Core domain model for bmsync.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "bmsync-core";

/// One normalized bookmark read from a feed.
///
/// `id` is derived from the feed entry itself, so reading the same entry twice
/// always yields the same value. It doubles as the external identifier of the
/// remote item created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    id: String,
    title: String,
    link: String,
    tags: Vec<String>,
    notes: Option<String>,
}

impl BookmarkRecord {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        link: impl Into<String>,
        tags: Vec<String>,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            link: link.into(),
            tags,
            notes,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// `None` when the entry had no description, `Some("")` when it was blank.
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

/// Outcome counters of one write pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub created: usize,
    pub skipped: usize,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.created + self.skipped
    }
}
