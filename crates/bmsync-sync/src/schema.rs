//! Resolution of logical bookmark fields onto the remote application's field ids.

use bmsync_core::BookmarkRecord;
use bmsync_podio::{AppField, FieldValuesUpdate, ItemCreate};
use thiserror::Error;

pub const TITLE_LABEL: &str = "Title";
pub const URL_LABEL: &str = "URL";
pub const NOTES_LABEL: &str = "Notes";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("application has no field labelled {label:?}")]
pub struct SchemaMappingError {
    pub label: &'static str,
}

/// Remote field ids for the three logical bookmark fields, valid for one write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub title: u64,
    pub url: u64,
    pub notes: u64,
}

fn field_id(app_fields: &[AppField], label: &'static str) -> Result<u64, SchemaMappingError> {
    app_fields
        .iter()
        .find(|f| f.label == label)
        .map(|f| f.field_id)
        .ok_or(SchemaMappingError { label })
}

impl FieldSchema {
    /// Labels match case-sensitively; the first field with a label wins.
    pub fn resolve(app_fields: &[AppField]) -> Result<Self, SchemaMappingError> {
        Ok(Self {
            title: field_id(app_fields, TITLE_LABEL)?,
            url: field_id(app_fields, URL_LABEL)?,
            notes: field_id(app_fields, NOTES_LABEL)?,
        })
    }

    /// Builds the creation payload. Absent notes leave the Notes field out entirely.
    pub fn item_for(&self, bookmark: &BookmarkRecord) -> ItemCreate {
        let mut fields = vec![
            FieldValuesUpdate::single(self.title, bookmark.title()),
            FieldValuesUpdate::single(self.url, bookmark.link()),
        ];
        if let Some(notes) = bookmark.notes() {
            fields.push(FieldValuesUpdate::single(self.notes, notes));
        }

        ItemCreate {
            external_id: bookmark.id().to_string(),
            fields,
            file_ids: Vec::new(),
            tags: bookmark.tags().to_vec(),
        }
    }
}
