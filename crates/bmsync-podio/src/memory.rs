//! In-memory `RemoteStore` for tests and local dry runs.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{AppField, AppId, ItemCreate, ItemRef, RemoteError, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    pub app_id: AppId,
    pub item_id: u64,
    pub item: ItemCreate,
    pub silent: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: Vec<StoredItem>,
    next_item_id: u64,
    lookups: usize,
    creates: usize,
    fail_on_create: Option<usize>,
}

/// In-process `RemoteStore` holding items in memory, for tests and local runs.
#[derive(Debug)]
pub struct MemoryStore {
    fields: Vec<AppField>,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(fields: Vec<AppField>) -> Self {
        Self {
            fields,
            state: Mutex::new(MemoryState {
                next_item_id: 1,
                ..MemoryState::default()
            }),
        }
    }

    /// Seeds an item that was imported by an earlier run.
    pub fn with_existing(self, app_id: AppId, external_id: &str) -> Self {
        {
            let mut state = self.lock();
            let item_id = state.next_item_id;
            state.next_item_id += 1;
            state.items.push(StoredItem {
                app_id,
                item_id,
                item: ItemCreate {
                    external_id: external_id.to_string(),
                    fields: Vec::new(),
                    file_ids: Vec::new(),
                    tags: Vec::new(),
                },
                silent: true,
            });
        }
        self
    }

    /// Makes the `nth` create call (1-based) fail with a remote error.
    pub fn fail_on_create(self, nth: usize) -> Self {
        self.lock().fail_on_create = Some(nth);
        self
    }

    pub fn items(&self) -> Vec<StoredItem> {
        self.lock().items.clone()
    }

    pub fn lookup_calls(&self) -> usize {
        self.lock().lookups
    }

    pub fn create_calls(&self) -> usize {
        self.lock().creates
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn application_fields(&self, _app_id: AppId) -> Result<Vec<AppField>, RemoteError> {
        Ok(self.fields.clone())
    }

    async fn find_items_by_external_id(
        &self,
        app_id: AppId,
        external_id: &str,
    ) -> Result<Vec<ItemRef>, RemoteError> {
        let mut state = self.lock();
        state.lookups += 1;
        Ok(state
            .items
            .iter()
            .filter(|s| s.app_id == app_id && s.item.external_id == external_id)
            .map(|s| ItemRef {
                item_id: s.item_id,
                external_id: Some(s.item.external_id.clone()),
            })
            .collect())
    }

    async fn create_item(
        &self,
        app_id: AppId,
        item: &ItemCreate,
        silent: bool,
    ) -> Result<ItemRef, RemoteError> {
        let mut state = self.lock();
        state.creates += 1;
        if state.fail_on_create == Some(state.creates) {
            return Err(RemoteError::Message(format!(
                "simulated failure creating {}",
                item.external_id
            )));
        }
        let item_id = state.next_item_id;
        state.next_item_id += 1;
        state.items.push(StoredItem {
            app_id,
            item_id,
            item: item.clone(),
            silent,
        });
        Ok(ItemRef {
            item_id,
            external_id: Some(item.external_id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValuesUpdate;

    #[tokio::test]
    async fn memory_store_finds_created_items_by_external_id() {
        let app = AppId(7);
        let store = MemoryStore::new(vec![AppField::new(1, "Title")]).with_existing(app, "old");
        let item = ItemCreate {
            external_id: "new".into(),
            fields: vec![FieldValuesUpdate::single(1, "New")],
            file_ids: vec![],
            tags: vec![],
        };

        assert!(store.find_items_by_external_id(app, "new").await.unwrap().is_empty());
        store.create_item(app, &item, true).await.unwrap();

        assert_eq!(store.find_items_by_external_id(app, "new").await.unwrap().len(), 1);
        assert_eq!(store.find_items_by_external_id(app, "old").await.unwrap().len(), 1);
        assert!(store.find_items_by_external_id(AppId(8), "new").await.unwrap().is_empty());
        assert_eq!(store.create_calls(), 1);
        assert_eq!(store.lookup_calls(), 4);
    }

    #[tokio::test]
    async fn memory_store_can_fail_a_chosen_create() {
        let store = MemoryStore::default().fail_on_create(2);
        let item = |id: &str| ItemCreate {
            external_id: id.into(),
            fields: vec![],
            file_ids: vec![],
            tags: vec![],
        };

        assert!(store.create_item(AppId(1), &item("a"), true).await.is_ok());
        assert!(store.create_item(AppId(1), &item("b"), true).await.is_err());
        assert_eq!(store.items().len(), 1);
    }

    #[tokio::test]
    async fn default_store_numbers_items_like_new() {
        let item = ItemCreate {
            external_id: "a".into(),
            fields: vec![],
            file_ids: vec![],
            tags: vec![],
        };

        let from_default = MemoryStore::default().create_item(AppId(1), &item, true).await.unwrap();
        let from_new = MemoryStore::new(vec![]).create_item(AppId(1), &item, true).await.unwrap();
        assert_eq!(from_default.item_id, 1);
        assert_eq!(from_default, from_new);
    }
}
