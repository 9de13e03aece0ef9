//! In-memory event store implementation.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation of
//! [`EventStore`](super::EventStore) suitable for tests, examples and
//! single-process applications.
//!
//! Locking is sharded per stream. The stream map lock is only held to look up
//! or create a stream; each stream then has its own mutex, held for the whole
//! precondition-check-then-append. Snapshot histories sit behind a separate
//! lock, and adding a snapshot only holds the owning stream's mutex long
//! enough to read its revision.
//!
//! # Example
//!
//! ```
//! use eventide_core::store::inmemory;
//!
//! let store = inmemory::Store::new();
//! ```

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, RwLock},
};

use nonempty::NonEmpty;

use super::{Error, EventSlice, EventStore, ExpectedRevision, Message, ReadTo, index};
use crate::{
    event::EventId,
    snapshot::{Snapshot, SnapshotBody, inmemory::Shelf},
};

#[derive(Default)]
struct Stream {
    messages: Vec<Message>,
    seen: HashSet<EventId>,
}

impl Stream {
    /// Current length, `None` while nothing has been committed.
    fn revision(&self) -> Option<u64> {
        (!self.messages.is_empty()).then_some(self.messages.len() as u64)
    }
}

type SharedStream = Arc<Mutex<Stream>>;

#[derive(Default)]
struct Inner {
    streams: RwLock<HashMap<String, SharedStream>>,
    snapshots: Shelf,
}

/// In-memory event store that keeps streams in a hash map.
///
/// Cloning is cheap and clones share the same data.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots kept in a history.
    #[must_use]
    pub fn snapshot_count(&self, snapshot_stream_id: &str) -> usize {
        self.inner.snapshots.len(snapshot_stream_id)
    }

    fn stream(&self, stream_id: &str) -> Option<SharedStream> {
        self.inner
            .streams
            .read()
            .expect("in-memory store lock poisoned")
            .get(stream_id)
            .cloned()
    }

    fn create_stream(&self, stream_id: &str) -> SharedStream {
        let mut streams = self
            .inner
            .streams
            .write()
            .expect("in-memory store lock poisoned");
        Arc::clone(streams.entry(stream_id.to_owned()).or_default())
    }

    fn revision_of(&self, stream_id: &str) -> Option<u64> {
        self.stream(stream_id)?
            .lock()
            .expect("in-memory stream lock poisoned")
            .revision()
    }

    #[tracing::instrument(skip(self, messages), fields(event_count = messages.len()))]
    fn append_now(
        &self,
        stream_id: &str,
        expected: ExpectedRevision,
        messages: NonEmpty<Message>,
    ) -> Result<u64, Error> {
        let shared = match self.stream(stream_id) {
            Some(shared) => shared,
            None => {
                expected.check(stream_id, None)?;
                self.create_stream(stream_id)
            }
        };
        let mut stream = shared.lock().expect("in-memory stream lock poisoned");
        expected.check(stream_id, stream.revision())?;

        let before = stream.messages.len();
        for mut message in messages {
            if !stream.seen.insert(message.id) {
                tracing::debug!(event_id = %message.id, "skipping duplicate event id");
                continue;
            }
            message.stamp_type_metadata();
            stream.messages.push(message);
        }
        let appended = (stream.messages.len() - before) as u64;
        tracing::info!(
            appended,
            revision = stream.messages.len(),
            "events appended to stream"
        );
        Ok(appended)
    }

    #[tracing::instrument(skip(self))]
    fn read_now(&self, stream_id: &str, from: u64, to: ReadTo) -> Result<EventSlice, Error> {
        let not_found = || Error::StreamNotFound {
            stream_id: stream_id.to_owned(),
        };
        let shared = self.stream(stream_id).ok_or_else(not_found)?;
        let stream = shared.lock().expect("in-memory stream lock poisoned");
        let revision = stream.revision().ok_or_else(not_found)?;
        let to = to.resolve(stream_id, from, revision)?;
        let messages = stream.messages[index(from)..index(to)].to_vec();
        tracing::info!(from, to, read = messages.len(), "events read from stream");
        Ok(EventSlice {
            messages,
            from,
            to,
            stream_revision: revision,
        })
    }

    #[tracing::instrument(skip(self, snapshot), fields(revision = snapshot.revision))]
    fn add_snapshot_now<T: SnapshotBody>(
        &self,
        stream_id: &str,
        snapshot_stream_id: &str,
        mut snapshot: Snapshot<T>,
    ) -> Result<(), Error> {
        let Some(stream_revision) = self.revision_of(stream_id) else {
            return Err(Error::StreamNotFound {
                stream_id: stream_id.to_owned(),
            });
        };
        if snapshot.revision > stream_revision {
            return Err(Error::InvalidSnapshotRevision {
                stream_id: stream_id.to_owned(),
                revision: snapshot.revision,
                stream_revision,
            });
        }
        snapshot.stamp_metadata(stream_id);
        self.inner.snapshots.push(snapshot_stream_id, snapshot);
        tracing::info!("snapshot added");
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let streams = self
            .inner
            .streams
            .read()
            .map_or(0, |streams| streams.len());
        f.debug_struct("Store")
            .field("streams", &streams)
            .finish_non_exhaustive()
    }
}

impl EventStore for Store {
    fn stream_exists(&self, stream_id: &str) -> impl Future<Output = Result<bool, Error>> + Send {
        std::future::ready(Ok(self.revision_of(stream_id).is_some()))
    }

    fn append(
        &self,
        stream_id: &str,
        expected: ExpectedRevision,
        messages: NonEmpty<Message>,
    ) -> impl Future<Output = Result<u64, Error>> + Send {
        std::future::ready(self.append_now(stream_id, expected, messages))
    }

    fn read_events(
        &self,
        stream_id: &str,
        from: u64,
        to: ReadTo,
    ) -> impl Future<Output = Result<EventSlice, Error>> + Send {
        std::future::ready(self.read_now(stream_id, from, to))
    }

    fn add_snapshot<T: SnapshotBody>(
        &self,
        stream_id: &str,
        snapshot_stream_id: &str,
        snapshot: Snapshot<T>,
    ) -> impl Future<Output = Result<(), Error>> + Send {
        std::future::ready(self.add_snapshot_now(stream_id, snapshot_stream_id, snapshot))
    }

    fn snapshot_exists<T: SnapshotBody>(
        &self,
        snapshot_stream_id: &str,
    ) -> impl Future<Output = Result<bool, Error>> + Send {
        std::future::ready(Ok(self.inner.snapshots.latest_is::<T>(snapshot_stream_id)))
    }

    fn read_snapshot<T: SnapshotBody>(
        &self,
        snapshot_stream_id: &str,
    ) -> impl Future<Output = Result<Snapshot<T>, Error>> + Send {
        std::future::ready(self.inner.snapshots.latest::<T>(snapshot_stream_id))
    }
}
