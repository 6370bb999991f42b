#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use stockroom_lib::backend::LocalBackend;
use stockroom_lib::inventory::{InventorySettings, InventoryStore};
use stockroom_lib::items::ItemDraft;
use stockroom_lib::notify::MemoryNotifier;
use stockroom_lib::uploads::SelectedFile;

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

pub async fn local_backend(dir: &Path) -> Arc<LocalBackend> {
    Arc::new(
        LocalBackend::open(&dir.join("stockroom.sqlite3"), &dir.join("storage"))
            .await
            .expect("open local backend"),
    )
}

pub fn store(
    backend: &Arc<LocalBackend>,
) -> (InventoryStore<LocalBackend>, Arc<MemoryNotifier>) {
    let notifier = Arc::new(MemoryNotifier::new());
    let store = InventoryStore::new(
        Arc::clone(backend),
        notifier.clone(),
        InventorySettings::default(),
    );
    (store, notifier)
}

/// PNG-signed bytes; different seeds give different content.
pub fn png_bytes(seed: u8) -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 13, seed, seed, seed]);
    bytes
}

pub fn png(name: &str, seed: u8) -> SelectedFile {
    SelectedFile::new(name, png_bytes(seed)).expect("png is an image")
}

pub fn draft(name: &str) -> ItemDraft {
    ItemDraft {
        name: name.to_string(),
        description: format!("{name} description"),
        quantity: 2,
        category: "Tools".to_string(),
    }
}

/// Blob files currently stored under the default bucket and prefix.
pub fn stored_blobs(backend: &LocalBackend) -> Vec<String> {
    let dir = backend.storage_root().join("items").join("public");
    let mut names: Vec<String> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
