use std::sync::Arc;
use std::time::Duration;

use lotbook_core::models::{IndexKey, MutationKind};
use lotbook_core::sync::SyncStage;
use lotbook_core::{
    Company, ConnectivityMonitor, Contact, Document, LocalStore, Lot, MemoryRemote, Photo,
    PhotoResolver, Sale, SyncOrchestrator, SyncSettings, SyncStatusHub, Table,
};
use pretty_assertions::assert_eq;
use serde_json::json;

struct Fixture {
    store: LocalStore,
    remote: Arc<MemoryRemote>,
    connectivity: ConnectivityMonitor,
    status: SyncStatusHub,
    orchestrator: SyncOrchestrator,
}

async fn fixture() -> Fixture {
    let store = LocalStore::open_in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let connectivity = ConnectivityMonitor::new(true);
    let status = SyncStatusHub::new(Duration::from_secs(1));
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        remote.clone(),
        status.clone(),
        connectivity.clone(),
        SyncSettings::default(),
    );
    Fixture {
        store,
        remote,
        connectivity,
        status,
        orchestrator,
    }
}

fn add_lot_with_photos(remote: &MemoryRemote, sale_id: &str, lot_id: &str, number: u32) {
    remote.insert(
        Table::Lots,
        json!({
            "id": lot_id,
            "sale_id": sale_id,
            "lot_number": number,
            "title": format!("Lot {number}"),
            "updated_at": "2025-03-01T10:00:00Z"
        }),
    );
    for (suffix, primary) in [("a", true), ("b", false)] {
        let path = format!("lots/{lot_id}/{suffix}.jpg");
        remote.insert(
            Table::Photos,
            json!({
                "id": format!("{lot_id}-{suffix}"),
                "lot_id": lot_id,
                "file_path": path,
                "is_primary": primary
            }),
        );
        remote.insert_blob(&path, format!("{lot_id}-{suffix}").into_bytes());
    }
}

/// One active sale with three lots and one completed sale with two lots.
fn seed_catalog(remote: &MemoryRemote) {
    remote.insert(
        Table::Companies,
        json!({"id": "c1", "name": "Harbor Auctions", "currency": "USD"}),
    );
    remote.insert(
        Table::Sales,
        json!({"id": "s-active", "company_id": "c1", "name": "Estate", "status": "active"}),
    );
    remote.insert(
        Table::Sales,
        json!({"id": "s-done", "company_id": "c1", "name": "Archive", "status": "completed"}),
    );
    for (index, lot_id) in ["l1", "l2", "l3"].into_iter().enumerate() {
        add_lot_with_photos(remote, "s-active", lot_id, u32::try_from(index).unwrap() + 1);
    }
    for (index, lot_id) in ["m1", "m2"].into_iter().enumerate() {
        add_lot_with_photos(remote, "s-done", lot_id, u32::try_from(index).unwrap() + 1);
    }
    remote.insert(
        Table::Contacts,
        json!({"id": "k1", "company_id": "c1", "name": "Front desk"}),
    );
    remote.insert(
        Table::Documents,
        json!({"id": "d1", "company_id": "c1", "sale_id": "s-active", "name": "Terms"}),
    );
    remote.insert(
        Table::Documents,
        json!({"id": "d2", "company_id": "c1", "sale_id": "s-done", "name": "Old terms"}),
    );
}

async fn snapshot(store: &LocalStore) -> serde_json::Value {
    json!({
        "companies": store.get_all::<Company>().await.unwrap(),
        "sales": store.get_all::<Sale>().await.unwrap(),
        "lots": store.get_all::<Lot>().await.unwrap(),
        "photos": store.get_all::<Photo>().await.unwrap(),
        "contacts": store.get_all::<Contact>().await.unwrap(),
        "documents": store.get_all::<Document>().await.unwrap(),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_only_syncs_active_sales() {
    let f = fixture().await;
    seed_catalog(&f.remote);

    let report = f.orchestrator.perform_initial_sync("c1").await.unwrap();

    assert_eq!(report.sales, 1);
    assert_eq!(report.lots, 3);
    assert_eq!(report.primary_downloads.succeeded, 3);
    assert_eq!(report.remaining_downloads.succeeded, 3);
    assert_eq!(report.documents, 1);
    assert_eq!(f.remote.download_count(), 6);
    assert!(f.store.get::<Lot>("m1").await.unwrap().is_none());
    assert!(f.store.get::<Sale>("s-done").await.unwrap().is_none());
    assert!(f.store.get::<Document>("d2").await.unwrap().is_none());

    let unsynced: Vec<Photo> = f
        .store
        .get_all_by_index(IndexKey::Synced, false)
        .await
        .unwrap();
    assert!(unsynced.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_pull_is_idempotent() {
    let f = fixture().await;
    seed_catalog(&f.remote);

    f.orchestrator.perform_initial_sync("c1").await.unwrap();
    let first = snapshot(&f.store).await;
    let report = f.orchestrator.perform_initial_sync("c1").await.unwrap();

    assert_eq!(snapshot(&f.store).await, first);
    assert_eq!(report.primary_downloads.total(), 0);
    assert_eq!(report.remaining_downloads.total(), 0);
    assert_eq!(f.remote.download_count(), 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn each_lot_keeps_one_primary_photo() {
    let f = fixture().await;
    seed_catalog(&f.remote);
    f.orchestrator.perform_initial_sync("c1").await.unwrap();

    // Another device moved the primary flag on l1.
    let mut old_primary = f.remote.record(Table::Photos, "l1-a").unwrap();
    old_primary["is_primary"] = json!(false);
    f.remote.insert(Table::Photos, old_primary);
    let mut new_primary = f.remote.record(Table::Photos, "l1-b").unwrap();
    new_primary["is_primary"] = json!(true);
    f.remote.insert(Table::Photos, new_primary);

    f.orchestrator.perform_initial_sync("c1").await.unwrap();

    for lot_id in ["l1", "l2", "l3"] {
        let photos: Vec<Photo> = f
            .store
            .get_all_by_index(IndexKey::LotId, lot_id)
            .await
            .unwrap();
        let primaries: Vec<&str> = photos
            .iter()
            .filter(|photo| photo.is_primary)
            .map(|photo| photo.id.as_str())
            .collect();
        assert_eq!(primaries.len(), 1, "lot {lot_id}");
    }
    let l1_primary: Photo = f.store.get("l1-b").await.unwrap().unwrap();
    assert!(l1_primary.is_primary);

    f.store.set_primary_photo("l2", "l2-b").await.unwrap();
    let l2: Vec<Photo> = f
        .store
        .get_all_by_index(IndexKey::LotId, "l2")
        .await
        .unwrap();
    assert_eq!(l2.iter().filter(|photo| photo.is_primary).count(), 1);
}

async fn primary_photo_ids(store: &LocalStore, lot_id: &str) -> Vec<String> {
    let photos: Vec<Photo> = store
        .get_all_by_index(IndexKey::LotId, lot_id)
        .await
        .unwrap();
    photos
        .into_iter()
        .filter(|photo| photo.is_primary)
        .map(|photo| photo.id)
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn local_primary_change_survives_pull_and_push() {
    let f = fixture().await;
    seed_catalog(&f.remote);
    f.orchestrator.perform_initial_sync("c1").await.unwrap();

    f.store.set_primary_photo("l1", "l1-b").await.unwrap();
    let report = f.orchestrator.perform_initial_sync("c1").await.unwrap();

    assert_eq!(report.conflicts, 0);
    assert_eq!(primary_photo_ids(&f.store, "l1").await, vec!["l1-b".to_string()]);
    assert_eq!(f.store.pending_mutation_count().await.unwrap(), 2);

    let push = f.orchestrator.push_local_changes().await.unwrap();
    assert_eq!(push.mutations_applied, 2);
    assert_eq!(f.remote.record(Table::Photos, "l1-a").unwrap()["is_primary"], false);
    assert_eq!(f.remote.record(Table::Photos, "l1-b").unwrap()["is_primary"], true);

    f.orchestrator.perform_initial_sync("c1").await.unwrap();
    assert_eq!(primary_photo_ids(&f.store, "l1").await, vec!["l1-b".to_string()]);
    assert_eq!(f.store.pending_mutation_count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn photo_downloads_stay_within_limit() {
    let f = fixture().await;
    f.remote.insert(Table::Companies, json!({"id": "c1", "name": "Harbor"}));
    f.remote.insert(
        Table::Sales,
        json!({"id": "s1", "company_id": "c1", "status": "upcoming"}),
    );
    for number in 1..=10 {
        let lot_id = format!("lot-{number}");
        f.remote.insert(
            Table::Lots,
            json!({"id": lot_id, "sale_id": "s1", "lot_number": number}),
        );
        let path = format!("lots/{lot_id}/main.jpg");
        f.remote.insert(
            Table::Photos,
            json!({"id": format!("{lot_id}-p"), "lot_id": lot_id, "file_path": path, "is_primary": true}),
        );
        f.remote.insert_blob(&path, vec![1, 2, 3]);
    }
    f.remote.set_download_delay(Duration::from_millis(30));

    let report = f.orchestrator.perform_initial_sync("c1").await.unwrap();

    assert_eq!(report.primary_downloads.succeeded, 10);
    assert!(f.remote.peak_concurrent_downloads() <= 4);
    assert!(f.remote.peak_concurrent_downloads() >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_download_leaves_photo_unsynced() {
    let f = fixture().await;
    f.remote.insert(Table::Companies, json!({"id": "c1", "name": "Harbor"}));
    f.remote.insert(
        Table::Sales,
        json!({"id": "s1", "company_id": "c1", "status": "active"}),
    );
    for number in 1..=5 {
        let lot_id = format!("lot-{number}");
        f.remote.insert(
            Table::Lots,
            json!({"id": lot_id, "sale_id": "s1", "lot_number": number}),
        );
        let path = format!("lots/{lot_id}/main.jpg");
        f.remote.insert(
            Table::Photos,
            json!({"id": format!("{lot_id}-p"), "lot_id": lot_id, "file_path": path, "is_primary": true}),
        );
        f.remote.insert_blob(&path, vec![9]);
    }
    f.remote.fail_downloads_for("lots/lot-3/main.jpg");

    let report = f.orchestrator.perform_initial_sync("c1").await.unwrap();

    assert_eq!(report.primary_downloads.succeeded, 4);
    assert_eq!(report.primary_downloads.failed, 1);
    let mut stored_blobs = 0;
    for number in 1..=5 {
        if f.store.has_blob(&format!("lot-{number}-p")).await.unwrap() {
            stored_blobs += 1;
        }
    }
    assert_eq!(stored_blobs, 4);
    let failed: Photo = f.store.get("lot-3-p").await.unwrap().unwrap();
    assert!(!failed.synced);
    assert!(f.store.last_sync_time().await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_lookups_share_one_request() {
    let f = fixture().await;
    let photo = Photo::new_local("l1", "lots/l1/shared.jpg");
    f.store.upsert(&photo).await.unwrap();
    f.remote.insert_blob("lots/l1/shared.jpg", vec![1]);
    f.remote.set_reference_delay(Duration::from_millis(50));
    f.remote.set_download_delay(Duration::from_secs(5));

    let resolver = PhotoResolver::new(
        f.store.clone(),
        f.remote.clone(),
        f.connectivity.clone(),
        &SyncSettings::default(),
    );
    let (first, second) = tokio::join!(
        resolver.display_reference(&photo.id),
        resolver.display_reference(&photo.id)
    );

    let first = first.unwrap().unwrap();
    assert_eq!(first, second.unwrap().unwrap());
    assert_eq!(f.remote.reference_requests(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn pushed_changes_apply_once() {
    let f = fixture().await;
    seed_catalog(&f.remote);
    f.orchestrator.perform_initial_sync("c1").await.unwrap();

    let mut lot: Lot = f.store.get("l1").await.unwrap().unwrap();
    lot.title = "Lot 1, restored".to_string();
    f.store
        .record_local_upsert(&lot, MutationKind::Update)
        .await
        .unwrap();
    let contact: Contact = serde_json::from_value(json!({
        "id": "k-new", "company_id": "c1", "name": "Consignor"
    }))
    .unwrap();
    f.store
        .record_local_upsert(&contact, MutationKind::Create)
        .await
        .unwrap();
    f.store.record_local_delete(Table::Lots, "l3").await.unwrap();

    let first = f.orchestrator.push_local_changes().await.unwrap();
    let upserts_after_first = f.remote.upsert_count();
    let second = f.orchestrator.push_local_changes().await.unwrap();

    assert_eq!(first.mutations_applied, 3);
    assert_eq!(second.mutations_applied, 0);
    assert_eq!(f.remote.upsert_count(), upserts_after_first);
    assert_eq!(f.remote.delete_count(), 1);
    // Pulled photos already have their bytes on both sides.
    assert_eq!(f.remote.upload_count(), 0);
    assert_eq!(f.store.pending_mutation_count().await.unwrap(), 0);
    assert_eq!(
        f.remote.record(Table::Lots, "l1").unwrap()["title"],
        "Lot 1, restored"
    );
    assert!(f.remote.record(Table::Contacts, "k-new").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn syncing_flag_tracks_running_operations() {
    let f = fixture().await;
    seed_catalog(&f.remote);
    f.remote.set_download_delay(Duration::from_millis(40));
    let mut status = f.status.on_status_change();
    assert!(!*status.borrow_and_update());

    let orchestrator = f.orchestrator.clone();
    let pull = tokio::spawn(async move { orchestrator.perform_initial_sync("c1").await });

    status.changed().await.unwrap();
    assert!(*status.borrow_and_update());

    // An overlapping operation keeps the flag on after the pull ends.
    let guard = f.status.operation();
    pull.await.unwrap().unwrap();
    assert!(f.status.is_syncing());
    drop(guard);
    assert!(!f.status.is_syncing());

    let progress = f.status.current_progress().unwrap();
    assert_eq!(progress.stage, SyncStage::Complete);
    assert_eq!(progress.current, progress.total);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_all_pushes_before_pulling() {
    let f = fixture().await;
    seed_catalog(&f.remote);
    f.orchestrator.perform_initial_sync("c1").await.unwrap();

    let mut lot: Lot = f.store.get("l2").await.unwrap().unwrap();
    lot.title = "Edited offline".to_string();
    f.store
        .record_local_upsert(&lot, MutationKind::Update)
        .await
        .unwrap();

    let report = f.orchestrator.sync_all("c1").await.unwrap();

    assert_eq!(report.push.mutations_applied, 1);
    assert_eq!(report.pull.conflicts, 0);
    let stored: Lot = f.store.get("l2").await.unwrap().unwrap();
    assert_eq!(stored.title, "Edited offline");
}
