//! Integration tests for the file-backed event store.

use std::path::{Path, PathBuf};

use eventide_core::{
    event::{DomainEvent, EventId, EventRegistry, RawEvent},
    store::{Error, EventStore, ExpectedRevision, Message, NonEmpty, ReadTo, header},
    test::StoreTestExt,
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
struct Frozen {
    reason: String,
}

impl DomainEvent for Frozen {
    const KIND: &'static str = "account.frozen";
}

fn registry() -> EventRegistry {
    let mut registry = EventRegistry::new();
    registry.register::<Deposited>();
    registry
}

async fn open(dir: &Path) -> Store {
    Store::open(Options::new(dir), registry()).await.unwrap()
}

fn deposit(amount: i64) -> Message {
    Message::new(Deposited { amount })
}

fn batch(amounts: &[i64]) -> NonEmpty<Message> {
    NonEmpty::from_vec(amounts.iter().copied().map(deposit).collect()).unwrap()
}

fn amounts(messages: &[Message]) -> Vec<i64> {
    messages
        .iter()
        .map(|message| message.payload::<Deposited>().unwrap().amount)
        .collect()
}

/// The only file under `<root>/streams`.
fn stream_file(root: &Path) -> PathBuf {
    let mut entries = std::fs::read_dir(root.join("streams"))
        .unwrap()
        .map(|entry| entry.unwrap().path());
    let path = entries.next().unwrap();
    assert!(entries.next().is_none());
    path
}

#[tokio::test]
async fn open_creates_the_directory_layout() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("nested").join("store");

    let store = Store::open(Options::new(&root), registry()).await.unwrap();

    assert_eq!(store.root(), root);
    assert!(root.join("streams").is_dir());
    assert!(root.join("snapshots").is_dir());
}

#[tokio::test]
async fn committed_events_survive_reopening() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(dir.path()).await;
        let appended = store
            .append("account-1", ExpectedRevision::New, batch(&[10, 20]))
            .await
            .unwrap();
        assert_eq!(appended, 2);
        store
            .append("account-1", ExpectedRevision::Exact(2), batch(&[5]))
            .await
            .unwrap();
    }

    let store = open(dir.path()).await;
    assert!(store.stream_exists("account-1").await.unwrap());
    let slice = store.read_all("account-1").await.unwrap();
    assert_eq!(amounts(&slice.messages), vec![10, 20, 5]);
    assert_eq!(slice.stream_revision, 3);

    let text = std::fs::read_to_string(stream_file(dir.path())).unwrap();
    assert_eq!(text.lines().count(), 2, "one line per committed batch");
}

#[tokio::test]
async fn preconditions_match_the_stream_state() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;

    let err = store
        .append("a", ExpectedRevision::Exact(1), batch(&[1]))
        .await
        .unwrap_err();
    assert!(err.is_stream_not_found());
    assert!(!store.stream_exists("a").await.unwrap());

    store
        .append("a", ExpectedRevision::New, batch(&[1]))
        .await
        .unwrap();

    let err = store
        .append("a", ExpectedRevision::New, batch(&[2]))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let err = store
        .append("a", ExpectedRevision::Exact(0), batch(&[2]))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    store
        .append("a", ExpectedRevision::Any, batch(&[3]))
        .await
        .unwrap();
    assert_eq!(store.read_all("a").await.unwrap().stream_revision, 2);
}

#[tokio::test]
async fn reads_return_the_requested_window() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    store
        .seed_events("a", (0..10).map(deposit).collect())
        .await
        .unwrap();

    let slice = store.read_events("a", 3, ReadTo::Revision(9)).await.unwrap();
    assert_eq!(amounts(&slice.messages), vec![3, 4, 5, 6, 7, 8]);
    assert_eq!((slice.from, slice.to, slice.stream_revision), (3, 9, 10));

    let tail = store.read_events("a", 7, ReadTo::End).await.unwrap();
    assert_eq!(amounts(&tail.messages), vec![7, 8, 9]);

    let empty = store.read_events("a", 10, ReadTo::End).await.unwrap();
    assert!(empty.is_empty());

    let err = store
        .read_events("a", 4, ReadTo::Revision(11))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRange { revision: 10, .. }));

    let err = store.read_all("missing").await.unwrap_err();
    assert!(err.is_stream_not_found());
}

#[tokio::test]
async fn duplicate_ids_are_skipped_even_after_reopening() {
    let dir = TempDir::new().unwrap();
    let first = EventId::new();
    {
        let store = open(dir.path()).await;
        let twice = NonEmpty::from_vec(vec![
            Message::with_id(first, Deposited { amount: 1 }),
            Message::with_id(first, Deposited { amount: 2 }),
        ])
        .unwrap();
        assert_eq!(
            store.append("a", ExpectedRevision::Any, twice).await.unwrap(),
            1
        );
    }

    let store = open(dir.path()).await;
    let replay = NonEmpty::new(Message::with_id(first, Deposited { amount: 3 }));
    assert_eq!(
        store.append("a", ExpectedRevision::Any, replay).await.unwrap(),
        0
    );
    assert_eq!(amounts(&store.read_all("a").await.unwrap().messages), vec![1]);
}

#[tokio::test]
async fn headers_are_persisted_with_store_owned_type_metadata() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    let message = deposit(7).with_header("tenant", "acme");
    store
        .append("a", ExpectedRevision::New, NonEmpty::new(message))
        .await
        .unwrap();
    drop(store);

    let store = open(dir.path()).await;
    let slice = store.read_all("a").await.unwrap();
    let stored = &slice.messages[0];
    assert_eq!(stored.header_str("tenant"), Some("acme"));
    assert_eq!(stored.header_str(header::EVENT_KIND), Some(Deposited::KIND));
    assert!(stored.header_str(header::EVENT_TYPE).is_some());
}

#[tokio::test]
async fn unregistered_kinds_are_read_as_raw_events() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    store
        .append(
            "a",
            ExpectedRevision::New,
            NonEmpty::new(Message::new(Frozen {
                reason: "audit".into(),
            })),
        )
        .await
        .unwrap();

    let slice = store.read_all("a").await.unwrap();
    let stored = &slice.messages[0];
    assert_eq!(stored.kind(), Frozen::KIND);
    assert!(stored.payload::<Frozen>().is_none());
    assert!(stored.payload::<RawEvent>().is_some());
}

#[tokio::test]
async fn a_torn_final_line_is_ignored_and_cut_before_the_next_write() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(dir.path()).await;
        store
            .append("a", ExpectedRevision::New, batch(&[1, 2]))
            .await
            .unwrap();
    }
    let path = stream_file(dir.path());
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(br#"{"events":[{"id":"#);
    std::fs::write(&path, &bytes).unwrap();

    let store = open(dir.path()).await;
    assert_eq!(amounts(&store.read_all("a").await.unwrap().messages), vec![1, 2]);

    store
        .append("a", ExpectedRevision::Exact(2), batch(&[3]))
        .await
        .unwrap();
    drop(store);

    let store = open(dir.path()).await;
    assert_eq!(
        amounts(&store.read_all("a").await.unwrap().messages),
        vec![1, 2, 3]
    );
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.ends_with('\n'));
}

#[tokio::test]
async fn a_corrupt_complete_line_is_a_backend_error() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    store
        .append("a", ExpectedRevision::New, batch(&[1]))
        .await
        .unwrap();
    let path = stream_file(dir.path());
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(b"not json\n");
    std::fs::write(&path, &bytes).unwrap();

    let err = store.read_all("a").await.unwrap_err();
    let Error::Backend(source) = err else {
        panic!("expected a backend error");
    };
    let source = source.downcast::<eventide_fs::Error>().unwrap();
    assert!(matches!(
        *source,
        eventide_fs::Error::Deserialization { line: 2, .. }
    ));
}

#[tokio::test]
async fn only_one_of_several_racing_exact_commits_wins() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    store
        .append("a", ExpectedRevision::New, batch(&[0]))
        .await
        .unwrap();

    let tasks: Vec<_> = (1..=8)
        .map(|amount| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append("a", ExpectedRevision::Exact(1), batch(&[amount]))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert!(err.is_conflict()),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.read_all("a").await.unwrap().stream_revision, 2);
}

#[tokio::test]
async fn options_control_durable_writes() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(Options::new(dir.path()).sync_writes(true), registry())
        .await
        .unwrap();

    store
        .append("a", ExpectedRevision::New, batch(&[1]))
        .await
        .unwrap();

    assert_eq!(amounts(&store.read_all("a").await.unwrap().messages), vec![1]);
}

#[tokio::test]
async fn a_root_is_open_through_one_handle_at_a_time() {
    let dir = TempDir::new().unwrap();
    let first = open(dir.path()).await;
    first
        .append("a", ExpectedRevision::New, batch(&[1]))
        .await
        .unwrap();

    let err = Store::open(Options::new(dir.path()), registry())
        .await
        .unwrap_err();
    assert!(matches!(err, eventide_fs::Error::Locked { .. }));

    // Clones share the lock and the cached stream state.
    let clone = first.clone();
    clone
        .append("a", ExpectedRevision::Exact(1), batch(&[2]))
        .await
        .unwrap();
    assert!(
        first
            .append("a", ExpectedRevision::Exact(1), batch(&[3]))
            .await
            .unwrap_err()
            .is_conflict()
    );
    drop(first);
    drop(clone);

    let second = open(dir.path()).await;
    assert!(
        second
            .append("a", ExpectedRevision::Exact(1), batch(&[4]))
            .await
            .unwrap_err()
            .is_conflict()
    );
    second
        .append("a", ExpectedRevision::Exact(2), batch(&[5]))
        .await
        .unwrap();
    assert_eq!(
        amounts(&second.read_all("a").await.unwrap().messages),
        vec![1, 2, 5]
    );
}

#[tokio::test]
async fn stream_ids_too_long_for_a_file_name_are_stored() {
    let dir = TempDir::new().unwrap();
    let long_id = "tenant-".repeat(43);
    assert!(long_id.len() > 300);
    {
        let store = open(dir.path()).await;
        store
            .append(&long_id, ExpectedRevision::New, batch(&[1, 2]))
            .await
            .unwrap();
        assert!(!store.stream_exists(&long_id[..300]).await.unwrap());
    }

    let path = stream_file(dir.path());
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.len() < 255, "{name}");

    let store = open(dir.path()).await;
    let slice = store.read_all(&long_id).await.unwrap();
    assert_eq!(amounts(&slice.messages), vec![1, 2]);
    assert_eq!(
        slice.messages[0].header_str(header::EVENT_KIND),
        Some(Deposited::KIND)
    );
}

#[tokio::test]
async fn a_file_holding_another_streams_records_is_an_error() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path()).await;
    store
        .append("a", ExpectedRevision::New, batch(&[1]))
        .await
        .unwrap();
    drop(store);

    let path = stream_file(dir.path());
    let impostor = path.with_file_name("62.jsonl");
    std::fs::rename(&path, &impostor).unwrap();

    let store = open(dir.path()).await;
    let Error::Backend(source) = store.read_all("b").await.unwrap_err() else {
        panic!("expected a backend error");
    };
    let source = source.downcast::<eventide_fs::Error>().unwrap();
    assert!(matches!(
        *source,
        eventide_fs::Error::ForeignRecord { ref expected, ref found, .. }
            if expected == "b" && found == "a"
    ));
}
