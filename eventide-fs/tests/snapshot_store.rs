//! Integration tests for snapshot histories in the file-backed store.

use std::path::Path;

use eventide_core::{
    event::{DomainEvent, EventRegistry},
    snapshot::{Snapshot, SnapshotId, snapshot_stream_id},
    store::{Error, EventStore, ExpectedRevision, Message, NonEmpty, header},
};
use eventide_fs::{Options, Store};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Deposited {
    amount: i64,
}

impl DomainEvent for Deposited {
    const KIND: &'static str = "account.deposited";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Balance {
    total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Summary {
    lines: Vec<String>,
}

async fn open(dir: &Path) -> Store {
    let mut registry = EventRegistry::new();
    registry.register::<Deposited>();
    Store::open(Options::new(dir), registry).await.unwrap()
}

async fn seed(store: &Store, stream_id: &str, count: i64) {
    let messages = (1..=count)
        .map(|amount| Message::new(Deposited { amount }))
        .collect();
    store
        .append(
            stream_id,
            ExpectedRevision::Any,
            NonEmpty::from_vec(messages).unwrap(),
        )
        .await
        .unwrap();
}

fn balance(revision: u64, total: i64) -> Snapshot<Balance> {
    Snapshot::new(SnapshotId::new(), revision, Balance { total })
}

#[tokio::test]
async fn the_latest_snapshot_survives_reopening() {
    let dir = TempDir::new().unwrap();
    let history = snapshot_stream_id("account-1");
    let latest = balance(4, 10);
    {
        let store = open(dir.path()).await;
        seed(&store, "account-1", 4).await;
        store
            .add_snapshot("account-1", &history, balance(2, 3))
            .await
            .unwrap();
        store
            .add_snapshot("account-1", &history, latest.clone())
            .await
            .unwrap();
    }

    let store = open(dir.path()).await;
    assert!(store.snapshot_exists::<Balance>(&history).await.unwrap());
    let read = store.read_snapshot::<Balance>(&history).await.unwrap();
    assert_eq!(read.id, latest.id);
    assert_eq!(read.revision, 4);
    assert_eq!(read.body, Balance { total: 10 });
    assert_eq!(
        read.headers.get(header::STREAM_ID),
        Some(&serde_json::Value::from("account-1"))
    );
}

#[tokio::test]
async fn snapshots_need_an_existing_stream_and_a_reached_revision() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    let history = snapshot_stream_id("a");

    let err = store
        .add_snapshot("a", &history, balance(0, 0))
        .await
        .unwrap_err();
    assert!(err.is_stream_not_found());

    seed(&store, "a", 2).await;
    let err = store
        .add_snapshot("a", &history, balance(3, 6))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidSnapshotRevision {
            revision: 3,
            stream_revision: 2,
            ..
        }
    ));
    assert!(!store.snapshot_exists::<Balance>(&history).await.unwrap());
}

#[tokio::test]
async fn missing_histories_report_not_found() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;

    assert!(!store.snapshot_exists::<Balance>("nothing").await.unwrap());
    let err = store.read_snapshot::<Balance>("nothing").await.unwrap_err();
    assert!(matches!(
        err,
        Error::StreamNotFound { ref stream_id } if stream_id == "nothing"
    ));
}

#[tokio::test]
async fn a_different_body_type_is_a_mismatch() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    let history = snapshot_stream_id("a");
    seed(&store, "a", 1).await;
    store
        .add_snapshot(
            "a",
            &history,
            Snapshot::new(SnapshotId::new(), 1, Summary { lines: Vec::new() }),
        )
        .await
        .unwrap();

    assert!(!store.snapshot_exists::<Balance>(&history).await.unwrap());
    assert!(store.snapshot_exists::<Summary>(&history).await.unwrap());
    let err = store.read_snapshot::<Balance>(&history).await.unwrap_err();
    assert!(matches!(
        err,
        Error::SnapshotTypeMismatch { ref found, .. } if found.ends_with("Summary")
    ));
}

#[tokio::test]
async fn a_torn_snapshot_line_falls_back_to_the_previous_one() {
    let dir = TempDir::new().unwrap();
    let history = snapshot_stream_id("a");
    let store = open(dir.path()).await;
    seed(&store, "a", 3).await;
    store
        .add_snapshot("a", &history, balance(3, 6))
        .await
        .unwrap();

    let path = std::fs::read_dir(dir.path().join("snapshots"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(br#"{"id":"00000000-0000-0000-0000-0"#);
    std::fs::write(&path, &bytes).unwrap();

    assert_eq!(
        store.read_snapshot::<Balance>(&history).await.unwrap().revision,
        3
    );

    store
        .add_snapshot("a", &history, balance(3, 7))
        .await
        .unwrap();
    let read = store.read_snapshot::<Balance>(&history).await.unwrap();
    assert_eq!(read.body.total, 7);
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
}

#[tokio::test]
async fn histories_are_isolated() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    seed(&store, "a", 1).await;
    seed(&store, "b", 2).await;
    store
        .add_snapshot("a", &snapshot_stream_id("a"), balance(1, 1))
        .await
        .unwrap();

    assert!(
        !store
            .snapshot_exists::<Balance>(&snapshot_stream_id("b"))
            .await
            .unwrap()
    );
    assert_eq!(
        store
            .read_snapshot::<Balance>(&snapshot_stream_id("a"))
            .await
            .unwrap()
            .body
            .total,
        1
    );
}

#[tokio::test]
async fn long_stream_ids_keep_their_snapshot_history() {
    let dir = TempDir::new().unwrap();
    let stream_id = "x".repeat(300);
    let history = snapshot_stream_id(&stream_id);
    let store = open(dir.path()).await;
    seed(&store, &stream_id, 2).await;
    store
        .add_snapshot(&stream_id, &history, balance(2, 3))
        .await
        .unwrap();

    let read = store.read_snapshot::<Balance>(&history).await.unwrap();
    assert_eq!(read.body, Balance { total: 3 });
    assert_eq!(
        read.headers.get(header::STREAM_ID),
        Some(&serde_json::Value::from(stream_id.as_str()))
    );
}
