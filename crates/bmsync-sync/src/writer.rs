//! Idempotent import of bookmarks as remote items.

use bmsync_core::{BookmarkRecord, ImportSummary};
use bmsync_podio::{AppId, RemoteStore};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::schema::FieldSchema;

pub struct ImportWriter<'a> {
    remote: &'a dyn RemoteStore,
    app_id: AppId,
}

impl<'a> ImportWriter<'a> {
    pub fn new(remote: &'a dyn RemoteStore, app_id: AppId) -> Self {
        Self { remote, app_id }
    }

    pub async fn resolve_schema(&self) -> Result<FieldSchema, SyncError> {
        let fields = self
            .remote
            .application_fields(self.app_id)
            .await
            .map_err(SyncError::remote(format!("application_fields({})", self.app_id)))?;
        Ok(FieldSchema::resolve(&fields)?)
    }

    /// Creates an item for every bookmark whose id is not yet an external id
    /// in the application. Existing items are left untouched. Stops at the
    /// first remote failure; items created before it stay created.
    pub async fn write(&self, bookmarks: &[BookmarkRecord]) -> Result<ImportSummary, SyncError> {
        let schema = self.resolve_schema().await?;
        let mut summary = ImportSummary::default();

        for bookmark in bookmarks {
            let existing = self
                .remote
                .find_items_by_external_id(self.app_id, bookmark.id())
                .await
                .map_err(SyncError::remote(format!(
                    "find_items_by_external_id({})",
                    bookmark.id()
                )))?;

            if !existing.is_empty() {
                // TODO: refresh title, notes and tags of the existing item once
                // full-replace vs merge semantics are decided.
                debug!(id = bookmark.id(), items = existing.len(), "already imported; skipping");
                summary.skipped += 1;
                continue;
            }

            let item = schema.item_for(bookmark);
            let created = self
                .remote
                .create_item(self.app_id, &item, true)
                .await
                .map_err(SyncError::remote(format!("create_item({})", bookmark.id())))?;
            info!(id = bookmark.id(), item_id = created.item_id, "created item");
            summary.created += 1;
        }

        debug!(
            created = summary.created,
            skipped = summary.skipped,
            total = summary.total(),
            "write pass finished"
        );
        Ok(summary)
    }
}
