//! End-to-end workflow tests over a real filesystem backend: write through
//! the facade, commit, branch, diverge, and check out back and forth.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use loam::db::{Database, DatabaseOptions};
use loam::events::{EventLog, EventLogOptions};
use loam::vcs::{BranchManager, CheckoutOptions};
use loam::{LocalBackend, Namespace};
use loam_core::model::{BranchName, Document};

fn ns(s: &str) -> Namespace {
    Namespace::new(s).unwrap()
}

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("expected object, got {other:?}"),
    }
}

fn open(dir: &TempDir) -> Arc<LocalBackend> {
    Arc::new(LocalBackend::new(dir.path().join("db")).unwrap())
}

#[test]
fn write_flush_reconstruct_round_trip() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir);
    let database = Database::open(storage.clone(), DatabaseOptions::default());

    let post = database
        .create(&ns("posts"), doc(json!({"$type": "Post", "title": "Original"})))
        .unwrap();
    database
        .update(&ns("posts"), post.id.local(), doc(json!({"title": "Updated"})))
        .unwrap();
    database.delete(&ns("posts"), post.id.local()).unwrap();
    database.flush().unwrap();

    // A completely fresh instance over the same files sees the same story.
    let fresh = EventLog::new(storage, EventLogOptions::default());
    let entity = fresh
        .reconstruct_entity(&ns("posts"), post.id.local())
        .unwrap()
        .unwrap();
    assert_eq!(entity.fields["title"], json!("Updated"));
    assert!(entity.deleted_at.is_some());
}

#[test]
fn auto_snapshot_after_threshold() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir);
    let database = Database::open(
        storage.clone(),
        DatabaseOptions {
            events: EventLogOptions {
                auto_snapshot_threshold: Some(2),
                ..EventLogOptions::default()
            },
            ..DatabaseOptions::default()
        },
    );

    let post = database.create(&ns("posts"), doc(json!({"n": 0}))).unwrap();
    database
        .update(&ns("posts"), post.id.local(), doc(json!({"n": 1})))
        .unwrap();
    database
        .update(&ns("posts"), post.id.local(), doc(json!({"n": 2})))
        .unwrap();
    database.flush().unwrap();

    database
        .event_log()
        .reconstruct_entity(&ns("posts"), post.id.local())
        .unwrap()
        .unwrap();
    let snapshot_path = format!("data/posts/snapshots/{}.json", post.id.local());
    assert!(
        loam::StorageBackend::exists(storage.as_ref(), &snapshot_path).unwrap(),
        "3 events past a threshold of 2 must leave a snapshot"
    );
}

#[test]
fn commit_branch_diverge_and_checkout() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir);
    // Compact on every flush so the working tree carries a columnar blob
    // for commits to freeze.
    let eager = DatabaseOptions {
        mergetree: loam::mergetree::MergeTreeOptions {
            compact_after_lines: 1,
            compact_after_bytes: 1,
        },
        ..DatabaseOptions::default()
    };

    // Seed some data and commit it on main.
    {
        let database = Database::open(storage.clone(), eager.clone());
        database
            .create(&ns("posts"), doc(json!({"title": "On main"})))
            .unwrap();
        database.dispose().unwrap();
    }
    let main_blob = loam::StorageBackend::read(storage.as_ref(), "data/posts/data.parquet").unwrap();
    let mgr = BranchManager::new(storage.clone());
    mgr.init().unwrap();
    let first = mgr.commit("ann", "posts on main").unwrap();

    // Branch off and change the tree.
    mgr.checkout(
        "experiment",
        &CheckoutOptions {
            create: true,
            ..CheckoutOptions::default()
        },
    )
    .unwrap();
    {
        let database = Database::open(storage.clone(), eager);
        database
            .create(&ns("posts"), doc(json!({"title": "On experiment"})))
            .unwrap();
        database.dispose().unwrap();
    }
    let second = mgr.commit("ann", "experiment work").unwrap();
    assert_eq!(second.parents, vec![first.hash.clone()]);
    let experiment_blob =
        loam::StorageBackend::read(storage.as_ref(), "data/posts/data.parquet").unwrap();
    assert_ne!(main_blob, experiment_blob);

    // Back to main: the tree must match the first commit again.
    mgr.checkout("main", &CheckoutOptions::default()).unwrap();
    assert_eq!(mgr.current().unwrap(), Some(BranchName::new("main").unwrap()));
    assert_eq!(
        loam::StorageBackend::read(storage.as_ref(), "data/posts/data.parquet").unwrap(),
        main_blob
    );
    let report = mgr.status().unwrap();
    assert!(!report.has_changes, "checkout must leave a clean tree: {report:?}");

    // History on experiment still has both commits.
    mgr.checkout("experiment", &CheckoutOptions::default()).unwrap();
    let log = mgr.log(10).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].message, "experiment work");
}

#[test]
fn object_store_round_trip_on_disk() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir);
    let objects = loam_core::objects::ObjectStore::new(storage);
    let payloads: Vec<Vec<u8>> = vec![b"".to_vec(), b"x".to_vec(), vec![0u8; 4096]];
    let mut hashes = BTreeMap::new();
    for payload in &payloads {
        let hash = objects.store(payload).unwrap();
        let again = objects.store(payload).unwrap();
        assert_eq!(hash, again, "storing identical bytes is idempotent");
        hashes.insert(hash.to_string(), payload.clone());
    }
    for (hash, payload) in hashes {
        let loaded = objects
            .load(&loam_core::model::ObjectHash::new(&hash).unwrap())
            .unwrap();
        assert_eq!(loaded, payload);
    }
}

#[test]
fn two_facades_share_flushed_state() {
    let dir = TempDir::new().unwrap();
    let storage = open(&dir);

    let writer = Database::open(storage.clone(), DatabaseOptions::default());
    let post = writer
        .create(&ns("posts"), doc(json!({"title": "Shared"})))
        .unwrap();
    writer.flush().unwrap();

    let reader = Database::open(storage, DatabaseOptions::default());
    let seen = reader.get(&ns("posts"), post.id.local()).unwrap().unwrap();
    assert_eq!(seen.fields["title"], json!("Shared"));
    assert_eq!(
        reader
            .event_log()
            .get_entity_events(&ns("posts"), post.id.local())
            .unwrap()
            .len(),
        1
    );
}
