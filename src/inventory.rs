//! Inventory screen state and the add / edit / delete workflow.
//!
//! `InventoryStore` keeps a local copy of the rows it has seen and updates
//! it only after the backend confirmed the change, so the local view never
//! runs ahead of the remote store.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::backend::{Backend, Filter, Order};
use crate::config::Config;
use crate::items::{matches_search, Item, ItemDraft, ItemEdit};
use crate::movements::{self, Movement, MovementDraft};
use crate::notify::{Notice, Notifier};
use crate::uploads::{self, SelectedFile};
use crate::{AppError, AppResult};

pub const ERR_ITEM_NOT_FOUND: &str = "ITEM/NOT_FOUND";

/// Where the workflow reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySettings {
    pub items_table: String,
    pub movements_table: String,
    pub bucket: String,
    pub storage_prefix: String,
}

impl From<&Config> for InventorySettings {
    fn from(config: &Config) -> Self {
        Self {
            items_table: config.items_table.clone(),
            movements_table: config.movements_table.clone(),
            bucket: config.bucket.clone(),
            storage_prefix: config.storage_prefix.clone(),
        }
    }
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            items_table: crate::config::DEFAULT_ITEMS_TABLE.into(),
            movements_table: crate::config::DEFAULT_MOVEMENTS_TABLE.into(),
            bucket: crate::config::DEFAULT_BUCKET.into(),
            storage_prefix: crate::config::DEFAULT_STORAGE_PREFIX.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemDetails {
    pub item: Item,
    pub movements: Vec<Movement>,
}

pub struct InventoryStore<B: Backend> {
    backend: Arc<B>,
    notifier: Arc<dyn Notifier>,
    settings: InventorySettings,
    items: Vec<Item>,
    search_term: String,
    selected_item: Option<i64>,
    is_edit_open: bool,
    selected_files: Vec<SelectedFile>,
}

fn not_found(id: i64) -> AppError {
    AppError::new(ERR_ITEM_NOT_FOUND, "Item not found").with_context("id", id.to_string())
}

impl<B: Backend> InventoryStore<B> {
    pub fn new(backend: Arc<B>, notifier: Arc<dyn Notifier>, settings: InventorySettings) -> Self {
        Self {
            backend,
            notifier,
            settings,
            items: Vec::new(),
            search_term: String::new(),
            selected_item: None,
            is_edit_open: false,
            selected_files: Vec::new(),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn settings(&self) -> &InventorySettings {
        &self.settings
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    /// Items matching the current search term, in list order.
    pub fn filtered(&self) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|item| matches_search(item, &self.search_term))
            .collect()
    }

    pub fn selected_files(&self) -> &[SelectedFile] {
        &self.selected_files
    }

    pub fn set_selected_files(&mut self, files: Vec<SelectedFile>) {
        self.selected_files = files;
    }

    pub fn selected_item(&self) -> Option<&Item> {
        let id = self.selected_item?;
        self.items.iter().find(|item| item.id == id)
    }

    pub fn is_edit_open(&self) -> bool {
        self.is_edit_open
    }

    pub fn open_edit(&mut self, id: i64) -> AppResult<&Item> {
        let item = self
            .items
            .iter()
            .find(|item| item.id == id)
            .ok_or_else(|| not_found(id))?;
        self.selected_item = Some(id);
        self.is_edit_open = true;
        Ok(item)
    }

    pub fn close_edit(&mut self) {
        self.is_edit_open = false;
    }

    fn notify_outcome<T>(
        &self,
        result: &AppResult<T>,
        success: &str,
        success_id: &str,
        error_prefix: &str,
        error_id: &'static str,
    ) {
        match result {
            Ok(_) => self
                .notifier
                .show(Notice::success(success).with_id(success_id)),
            Err(err) => {
                err.log_with_event(error_id);
                self.notifier.show(
                    Notice::error(format!("{error_prefix}: {}", err.message())).with_id(error_id),
                );
            }
        }
    }

    /// Reload every item from the backend, replacing the local list.
    pub async fn fetch_items(&mut self) -> AppResult<&[Item]> {
        let result = self.load_all_items().await;
        match result {
            Ok(items) => {
                info!(target: "stockroom", event = "items_fetched", count = items.len());
                self.items = items;
                Ok(&self.items)
            }
            Err(err) => {
                self.notifier.show(
                    Notice::error(format!("Error loading items: {}", err.message()))
                        .with_id("fetch-items-error"),
                );
                Err(err)
            }
        }
    }

    async fn load_all_items(&self) -> AppResult<Vec<Item>> {
        let rows = self
            .backend
            .select(&self.settings.items_table, &[], Some(&Order::asc("id")))
            .await
            .map_err(|err| err.with_context("operation", "fetch_items"))?;
        rows.into_iter().map(Item::from_row).collect()
    }

    /// Fetch a single item straight from the backend.
    pub async fn get_item(&self, id: i64) -> AppResult<Item> {
        let rows = self
            .backend
            .select(&self.settings.items_table, &[Filter::eq("id", id)], None)
            .await
            .map_err(|err| err.with_context("operation", "get_item"))?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(id))?;
        Item::from_row(row)
    }

    fn replace_local(&mut self, item: Item) {
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    /// Validate, upload the selected files, insert the row and append it to
    /// the local list.
    pub async fn add_item(&mut self, draft: ItemDraft) -> AppResult<Item> {
        let result = self.insert_item(&draft).await;
        self.notify_outcome(
            &result,
            "Item added successfully!",
            "add-item-success",
            "Error adding item",
            "add-item-error",
        );
        let item = result?;
        self.items.push(item.clone());
        self.selected_files.clear();
        Ok(item)
    }

    async fn insert_item(&self, draft: &ItemDraft) -> AppResult<Item> {
        draft.validate().map_err(AppError::from)?;
        let urls = uploads::upload_images(
            self.backend.as_ref(),
            &self.settings.bucket,
            &self.settings.storage_prefix,
            &self.selected_files,
        )
        .await?;

        let mut row = draft.to_columns();
        row.insert(
            "images".into(),
            Value::Array(urls.into_iter().map(Value::String).collect()),
        );
        let stored = self
            .backend
            .insert(&self.settings.items_table, row)
            .await
            .map_err(|err| err.with_context("operation", "add_item"))?;
        let item = Item::from_row(stored)?;
        info!(
            target: "stockroom",
            event = "item_added",
            id = item.id,
            images = item.images.len()
        );
        Ok(item)
    }

    /// Write the edited fields and refresh the local copy.
    pub async fn save_item(&mut self, edit: ItemEdit) -> AppResult<Item> {
        let result = self.update_item(&edit).await;
        self.notify_outcome(
            &result,
            "Item updated successfully!",
            "save-item-success",
            "Error updating item",
            "save-item-error",
        );
        let item = result?;
        self.replace_local(item.clone());
        self.is_edit_open = false;
        Ok(item)
    }

    async fn update_item(&self, edit: &ItemEdit) -> AppResult<Item> {
        edit.validate().map_err(AppError::from)?;
        let rows = self
            .backend
            .update(
                &self.settings.items_table,
                &[Filter::eq("id", edit.id)],
                edit.draft.to_columns(),
            )
            .await
            .map_err(|err| err.with_context("operation", "save_item"))?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(edit.id))?;
        let item = Item::from_row(row)?;
        info!(target: "stockroom", event = "item_updated", id = item.id);
        Ok(item)
    }

    /// Remove the item's images that no other item references, then the row.
    pub async fn delete_item(&mut self, id: i64) -> AppResult<()> {
        let result = self.remove_item(id).await;
        self.notify_outcome(
            &result,
            "Item deleted successfully!",
            "delete-item-success",
            "Error deleting item",
            "delete-item-error",
        );
        result?;
        self.items.retain(|item| item.id != id);
        if self.selected_item == Some(id) {
            self.selected_item = None;
            self.is_edit_open = false;
        }
        Ok(())
    }

    async fn remove_item(&self, id: i64) -> AppResult<()> {
        let item = match self.items.iter().find(|item| item.id == id) {
            Some(item) => item.clone(),
            None => self.get_item(id).await?,
        };

        let exclusive = self.exclusive_images(&item).await?;
        let paths = uploads::object_paths_for_urls(
            self.backend.as_ref(),
            &self.settings.bucket,
            &exclusive,
        );
        if !paths.is_empty() {
            self.backend
                .remove(&self.settings.bucket, &paths)
                .await
                .map_err(|err| {
                    let message = format!("Error deleting images: {}", err.message());
                    err.with_message(message).with_context("id", id.to_string())
                })?;
        }

        let deleted = self
            .backend
            .delete(&self.settings.items_table, &[Filter::eq("id", id)])
            .await
            .map_err(|err| err.with_context("operation", "delete_item"))?;
        if deleted == 0 {
            return Err(not_found(id));
        }
        info!(
            target: "stockroom",
            event = "item_deleted",
            id = id,
            images_removed = paths.len(),
            images_kept = item.images.len().saturating_sub(exclusive.len())
        );
        Ok(())
    }

    /// Image URLs of `item` that no other row references. Content
    /// addressing means two items can point at the same object.
    async fn exclusive_images(&self, item: &Item) -> AppResult<Vec<String>> {
        let mut exclusive = Vec::new();
        let mut seen = HashSet::new();
        for url in &item.images {
            if !seen.insert(url.as_str()) {
                continue;
            }
            let holders = self
                .backend
                .select(
                    &self.settings.items_table,
                    &[Filter::contains("images", url.as_str())],
                    None,
                )
                .await
                .map_err(|err| err.with_context("operation", "check_shared_images"))?;
            let shared = holders.iter().any(|row| {
                row.get("id").and_then(Value::as_i64) != Some(item.id)
            });
            if shared {
                warn!(
                    target: "stockroom",
                    event = "image_shared_kept",
                    id = item.id,
                    url = url.as_str()
                );
            } else {
                exclusive.push(url.clone());
            }
        }
        Ok(exclusive)
    }

    /// The item and its movement history, fetched together.
    pub async fn item_details(&self, id: i64) -> AppResult<ItemDetails> {
        let (item, movements) = futures::try_join!(
            self.get_item(id),
            movements::list_movements(
                self.backend.as_ref(),
                &self.settings.movements_table,
                id
            )
        )?;
        Ok(ItemDetails { item, movements })
    }

    /// Store a new location. Returns `false` when it already matched.
    pub async fn update_location(&mut self, id: i64, location: &str) -> AppResult<bool> {
        let result = self.write_location(id, location).await;
        match &result {
            Ok(Some(_)) => self.notifier.show(
                Notice::success("Location updated successfully!").with_id("location-success"),
            ),
            Ok(None) => {}
            Err(err) => self.notifier.show(
                Notice::error(format!("Error updating location: {}", err.message()))
                    .with_id("location-error"),
            ),
        }
        match result? {
            Some(item) => {
                self.replace_local(item);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn write_location(&self, id: i64, location: &str) -> AppResult<Option<Item>> {
        let current = match self.items.iter().find(|item| item.id == id) {
            Some(item) => item.clone(),
            None => self.get_item(id).await?,
        };
        let location = location.trim();
        if current.location.as_deref().unwrap_or_default() == location {
            return Ok(None);
        }

        let mut patch = Map::new();
        patch.insert("location".into(), Value::from(location));
        let rows = self
            .backend
            .update(&self.settings.items_table, &[Filter::eq("id", id)], patch)
            .await
            .map_err(|err| err.with_context("operation", "update_location"))?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(id))?;
        let item = Item::from_row(row)?;
        info!(target: "stockroom", event = "location_updated", id = id);
        Ok(Some(item))
    }

    /// Record a movement for an existing item.
    pub async fn record_movement(
        &self,
        item_id: i64,
        draft: &MovementDraft,
    ) -> AppResult<Movement> {
        let result = async {
            if !self.items.iter().any(|item| item.id == item_id) {
                self.get_item(item_id).await?;
            }
            movements::record_movement(
                self.backend.as_ref(),
                &self.settings.movements_table,
                item_id,
                draft,
            )
            .await
        }
        .await;
        self.notify_outcome(
            &result,
            "Movement recorded.",
            "movement-success",
            "Error recording movement",
            "movement-error",
        );
        result
    }

    pub async fn list_movements(&self, item_id: i64) -> AppResult<Vec<Movement>> {
        movements::list_movements(
            self.backend.as_ref(),
            &self.settings.movements_table,
            item_id,
        )
        .await
    }
}
