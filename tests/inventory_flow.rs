#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use stockroom_lib::backend::{Filter, TableBackend};
use stockroom_lib::inventory::ERR_ITEM_NOT_FOUND;
use stockroom_lib::items::{ItemChanges, ItemEdit};
use stockroom_lib::movements::MovementDraft;
use stockroom_lib::notify::NoticeKind;
use stockroom_lib::uploads::content_hash;
use stockroom_lib::validation::VALIDATION_CODE;
use tempfile::tempdir;
use util::{draft, local_backend, png, png_bytes, store, stored_blobs};

#[tokio::test]
async fn add_item_uploads_each_distinct_image_once() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, notices) = store(&backend);

    store.set_selected_files(vec![png("front.PNG", 1), png("copy.png", 1), png("back.png", 2)]);
    let item = store.add_item(draft("Drill")).await.expect("item added");

    assert_eq!(item.images.len(), 2);
    assert!(item.images[0].ends_with(&format!("public/{}.png", content_hash(&png_bytes(1)))));
    assert!(item.images[1].ends_with(&format!("public/{}.png", content_hash(&png_bytes(2)))));
    assert_eq!(stored_blobs(&backend).len(), 2);

    assert!(store.selected_files().is_empty());
    assert_eq!(store.items().len(), 1);
    let notice = notices.last().expect("notice shown");
    assert_eq!(notice.kind, NoticeKind::Success);
    assert_eq!(notice.message, "Item added successfully!");
    assert_eq!(notice.id.as_deref(), Some("add-item-success"));
}

#[tokio::test]
async fn same_bytes_under_two_extensions_upload_once() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, _) = store(&backend);

    store.set_selected_files(vec![png("photo.png", 1), png("photo.jpg", 1)]);
    let item = store.add_item(draft("Camera")).await.unwrap();

    assert_eq!(item.images.len(), 1);
    assert!(item.images[0].ends_with(&format!("public/{}.png", content_hash(&png_bytes(1)))));
    assert_eq!(stored_blobs(&backend).len(), 1);
}

#[tokio::test]
async fn image_already_in_storage_is_reused() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, _) = store(&backend);

    store.set_selected_files(vec![png("a.png", 7)]);
    let first = store.add_item(draft("Ladder")).await.unwrap();
    store.set_selected_files(vec![png("same-bytes-other-name.png", 7)]);
    let second = store.add_item(draft("Step ladder")).await.unwrap();

    assert_eq!(first.images, second.images);
    assert_eq!(stored_blobs(&backend).len(), 1);
}

#[tokio::test]
async fn deleting_an_item_keeps_images_other_items_use() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, notices) = store(&backend);

    store.set_selected_files(vec![png("shared.png", 1), png("own.png", 2)]);
    let first = store.add_item(draft("Saw")).await.unwrap();
    store.set_selected_files(vec![png("shared.png", 1)]);
    let second = store.add_item(draft("Hacksaw")).await.unwrap();
    assert_eq!(stored_blobs(&backend).len(), 2);

    store.delete_item(first.id).await.expect("first deleted");
    let shared_name = format!("{}.png", content_hash(&png_bytes(1)));
    assert_eq!(stored_blobs(&backend), vec![shared_name]);
    assert_eq!(
        notices.last().unwrap().message,
        "Item deleted successfully!"
    );

    store.delete_item(second.id).await.expect("second deleted");
    assert!(stored_blobs(&backend).is_empty());
    assert!(store.items().is_empty());
}

#[tokio::test]
async fn invalid_draft_is_reported_and_nothing_is_uploaded() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, notices) = store(&backend);

    store.set_selected_files(vec![png("a.png", 1)]);
    let mut bad = draft("x");
    bad.name = "  ".into();
    bad.quantity = 0;
    let err = store.add_item(bad).await.expect_err("invalid");

    assert_eq!(err.code(), VALIDATION_CODE);
    assert!(stored_blobs(&backend).is_empty());
    assert_eq!(store.selected_files().len(), 1);
    let notice = notices.last().unwrap();
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(notice.id.as_deref(), Some("add-item-error"));
    assert_eq!(
        notice.message,
        "Error adding item: Name is required; Quantity must be at least 1"
    );
}

#[tokio::test]
async fn repeated_errors_replace_the_previous_notice() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, notices) = store(&backend);

    let mut bad = draft("x");
    bad.category = String::new();
    store.add_item(bad.clone()).await.unwrap_err();
    store.add_item(bad).await.unwrap_err();
    assert_eq!(notices.visible().len(), 1);
}

#[tokio::test]
async fn save_item_updates_row_and_closes_editor() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, notices) = store(&backend);
    let item = store.add_item(draft("Hammer")).await.unwrap();

    let edit = {
        let current = store.open_edit(item.id).expect("item present");
        ItemChanges {
            quantity: Some(9),
            category: Some("Hand tools".into()),
            ..ItemChanges::default()
        }
        .apply_to(current)
    };
    assert!(store.is_edit_open());
    let saved = store.save_item(edit).await.expect("saved");

    assert_eq!(saved.quantity, 9);
    assert_eq!(saved.category, "Hand tools");
    assert_eq!(saved.name, "Hammer");
    assert!(!store.is_edit_open());
    assert_eq!(store.items()[0].quantity, 9);
    assert_eq!(notices.last().unwrap().message, "Item updated successfully!");

    let stored = store.get_item(item.id).await.unwrap();
    assert_eq!(stored.quantity, 9);
}

#[tokio::test]
async fn saving_a_missing_item_reports_not_found() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, notices) = store(&backend);

    let err = store
        .save_item(ItemEdit {
            id: 404,
            draft: draft("Ghost"),
        })
        .await
        .expect_err("missing");
    assert_eq!(err.code(), ERR_ITEM_NOT_FOUND);
    assert_eq!(
        notices.last().unwrap().message,
        "Error updating item: Item not found"
    );
    assert!(store.open_edit(404).is_err());
}

#[tokio::test]
async fn search_filters_fetched_items() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut writer, _) = store(&backend);
    writer.add_item(draft("Cordless drill")).await.unwrap();
    let mut paint = draft("Paint roller");
    paint.category = "Decorating".into();
    writer.add_item(paint).await.unwrap();

    let (mut reader, _) = store(&backend);
    reader.fetch_items().await.unwrap();
    assert_eq!(reader.items().len(), 2);

    reader.set_search_term("DECOR");
    let names: Vec<_> = reader.filtered().iter().map(|i| i.name.clone()).collect();
    assert_eq!(names, vec!["Paint roller".to_string()]);

    reader.set_search_term("");
    assert_eq!(reader.filtered().len(), 2);
}

#[tokio::test]
async fn location_update_is_skipped_when_unchanged() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, notices) = store(&backend);
    let item = store.add_item(draft("Vice")).await.unwrap();

    assert!(store.update_location(item.id, "Bench").await.unwrap());
    let notice = notices.last().unwrap();
    assert_eq!(notice.message, "Location updated successfully!");
    assert_eq!(notice.id.as_deref(), Some("location-success"));
    let shown = notices.visible().len();

    assert!(!store.update_location(item.id, " Bench ").await.unwrap());
    assert_eq!(notices.visible().len(), shown);
    assert_eq!(store.items()[0].location.as_deref(), Some("Bench"));

    let rows = backend
        .select("items", &[Filter::eq("id", item.id)], None)
        .await
        .unwrap();
    assert_eq!(rows[0]["location"], "Bench");
}

#[tokio::test]
async fn movements_are_listed_with_item_details_and_leave_stock_alone() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, notices) = store(&backend);
    let item = store.add_item(draft("Pallet")).await.unwrap();

    for (origin, destination) in [("Dock", "Aisle 3"), ("Aisle 3", "Shop floor")] {
        store
            .record_movement(
                item.id,
                &MovementDraft {
                    origin: origin.into(),
                    destination: destination.into(),
                    quantity: 1,
                },
            )
            .await
            .expect("recorded");
    }
    assert_eq!(notices.last().unwrap().message, "Movement recorded.");

    let details = store.item_details(item.id).await.unwrap();
    assert_eq!(details.item.quantity, item.quantity);
    assert_eq!(details.movements.len(), 2);
    assert_eq!(details.movements[0].origin, "Dock");
    assert_eq!(details.movements[1].destination, "Shop floor");
    assert!(details.movements.iter().all(|m| m.item_id == item.id));
}

#[tokio::test]
async fn movement_for_unknown_item_is_rejected() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (store, notices) = store(&backend);

    let err = store
        .record_movement(
            77,
            &MovementDraft {
                origin: "A".into(),
                destination: "B".into(),
                quantity: 1,
            },
        )
        .await
        .expect_err("no such item");
    assert_eq!(err.code(), ERR_ITEM_NOT_FOUND);
    assert_eq!(
        notices.last().unwrap().message,
        "Error recording movement: Item not found"
    );
}

#[tokio::test]
async fn deleting_an_item_drops_its_movements() {
    let dir = tempdir().unwrap();
    let backend = local_backend(dir.path()).await;
    let (mut store, _) = store(&backend);
    let item = store.add_item(draft("Crate")).await.unwrap();
    store
        .record_movement(
            item.id,
            &MovementDraft {
                origin: "A".into(),
                destination: "B".into(),
                quantity: 3,
            },
        )
        .await
        .unwrap();

    store.delete_item(item.id).await.unwrap();
    assert!(store.list_movements(item.id).await.unwrap().is_empty());
    let err = store.get_item(item.id).await.unwrap_err();
    assert_eq!(err.code(), ERR_ITEM_NOT_FOUND);
}
