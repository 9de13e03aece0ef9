//! Application-facing orchestration.
//!
//! [`Repository`] composes the aggregate engine, an [`EventStore`] and the
//! snapshot protocol into the load, save and snapshot workflows application
//! code calls. It never retries: a concurrency conflict is returned to the
//! caller, who reloads, re-runs the business logic and saves again.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    aggregate::{self, Aggregate},
    concurrency::{ConcurrencyConflict, ConcurrencyStrategy, Optimistic, Unchecked},
    snapshot::{Snapshot, SnapshotId, Snapshotting},
    store::{self, EventStore, Message, ReadTo, header},
};

/// Repository operation failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("aggregate `{stream_id}` has no uncommitted events to save")]
    NoUncommittedEvents { stream_id: String },
    #[error(
        "aggregate `{stream_id}` has uncommitted events; save them before taking a snapshot"
    )]
    UncommittedEventsPending { stream_id: String },
    #[error(transparent)]
    Store(#[from] store::Error),
}

impl Error {
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }

    #[must_use]
    pub const fn is_stream_not_found(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_stream_not_found())
    }

    #[must_use]
    pub const fn as_conflict(&self) -> Option<&ConcurrencyConflict> {
        match self {
            Self::Store(store::Error::Conflict(conflict)) => Some(conflict),
            _ => None,
        }
    }
}

/// Optional causal context written on every message of a save.
///
/// Blank values are not written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    pub causation_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl Correlation {
    #[must_use]
    pub fn caused_by(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    #[must_use]
    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    fn stamp(&self, mut message: Message) -> Message {
        for (key, value) in [
            (header::CAUSATION_ID, &self.causation_id),
            (header::CONVERSATION_ID, &self.conversation_id),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                message = message.with_header(key, value);
            }
        }
        message
    }
}

/// Loads and saves aggregates against an event store.
///
/// ```
/// use eventide_core::{repository::Repository, store::inmemory};
///
/// let repository = Repository::new(inmemory::Store::new());
/// ```
#[derive(Debug, Clone)]
pub struct Repository<S> {
    store: S,
}

impl<S: EventStore> Repository<S> {
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Whether an event stream holds any events.
    ///
    /// # Errors
    ///
    /// Only store infrastructure failures.
    pub async fn exists(&self, stream_id: &str) -> Result<bool, Error> {
        Ok(self.store.stream_exists(stream_id).await?)
    }

    /// Whether the aggregate's stream holds any events.
    ///
    /// # Errors
    ///
    /// Only store infrastructure failures.
    pub async fn aggregate_exists<A: Aggregate>(&self, aggregate: &A) -> Result<bool, Error> {
        self.exists(aggregate.stream_id()).await
    }

    /// Replay the aggregate's whole stream into a freshly constructed
    /// aggregate.
    ///
    /// # Errors
    ///
    /// Returns a stream-not-found error if the stream is absent.
    #[tracing::instrument(skip_all, fields(stream_id = aggregate.stream_id()))]
    pub async fn load<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), Error> {
        let slice = self.store.read_all(aggregate.stream_id()).await?;
        aggregate::replay(aggregate, &slice.messages);
        tracing::debug!(revision = aggregate.revision(), "aggregate loaded");
        Ok(())
    }

    /// Like [`load`](Self::load), but reports an absent stream as `false`.
    ///
    /// # Errors
    ///
    /// Any store failure other than a missing stream.
    pub async fn load_if_exists<A: Aggregate>(&self, aggregate: &mut A) -> Result<bool, Error> {
        match self.load(aggregate).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_stream_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Restore from the newest snapshot, then replay the events committed
    /// after it.
    ///
    /// # Errors
    ///
    /// Returns a stream-not-found error if there is no snapshot, and a
    /// snapshot type mismatch if the newest one is not an `A::Snapshot`.
    #[tracing::instrument(skip_all, fields(stream_id = aggregate.stream_id()))]
    pub async fn load_from_latest_snapshot<A: Snapshotting>(
        &self,
        aggregate: &mut A,
    ) -> Result<(), Error> {
        let stream_id = aggregate.stream_id().to_owned();
        let snapshot = self
            .store
            .read_snapshot::<A::Snapshot>(&aggregate.snapshot_stream_id())
            .await?;
        let restored_at = snapshot.revision;
        // Read everything before touching the aggregate so a failed read
        // leaves it as it was.
        let tail = self
            .store
            .read_events(&stream_id, restored_at, ReadTo::End)
            .await?;

        aggregate.restore_from_snapshot(snapshot.body);
        aggregate.state_mut().restore_at(restored_at);
        aggregate::replay(aggregate, &tail.messages);
        tracing::debug!(
            snapshot_revision = restored_at,
            replayed = tail.len(),
            revision = aggregate.revision(),
            "aggregate loaded from snapshot"
        );
        Ok(())
    }

    /// Load from the newest snapshot if it is an `A::Snapshot`, otherwise
    /// fall back to [`load_if_exists`](Self::load_if_exists).
    ///
    /// Returns `false` only when neither a snapshot nor a stream exists.
    ///
    /// # Errors
    ///
    /// Any store failure other than a missing stream.
    pub async fn load_from_latest_snapshot_if_exists<A: Snapshotting>(
        &self,
        aggregate: &mut A,
    ) -> Result<bool, Error> {
        if self
            .store
            .snapshot_exists::<A::Snapshot>(&aggregate.snapshot_stream_id())
            .await?
        {
            self.load_from_latest_snapshot(aggregate).await?;
            return Ok(true);
        }
        self.load_if_exists(aggregate).await
    }

    /// Commit the aggregate's uncommitted events, expecting the stream to be
    /// at the revision the aggregate was loaded at.
    ///
    /// On success the revision advances by the number of events appended and
    /// the uncommitted queue is cleared. Returns that number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoUncommittedEvents`] if there is nothing to save, a
    /// concurrency conflict if another writer advanced the stream, and a
    /// stream-not-found error if the aggregate expects events the stream
    /// does not have.
    pub async fn save<A: Aggregate>(
        &self,
        aggregate: &mut A,
        correlation: &Correlation,
    ) -> Result<u64, Error> {
        self.save_with::<Optimistic, A>(aggregate, correlation).await
    }

    /// Commit the aggregate's uncommitted events at the current head of the
    /// stream, whatever it is.
    ///
    /// Last writer wins: only safe with a single writer per stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoUncommittedEvents`] if there is nothing to save.
    pub async fn save_without_concurrency_check<A: Aggregate>(
        &self,
        aggregate: &mut A,
        correlation: &Correlation,
    ) -> Result<u64, Error> {
        self.save_with::<Unchecked, A>(aggregate, correlation).await
    }

    #[tracing::instrument(
        skip_all,
        fields(stream_id = aggregate.stream_id(), checked = C::CHECK_REVISION)
    )]
    async fn save_with<C: ConcurrencyStrategy, A: Aggregate>(
        &self,
        aggregate: &mut A,
        correlation: &Correlation,
    ) -> Result<u64, Error> {
        let stream_id = aggregate.stream_id().to_owned();
        if aggregate.uncommitted_events().is_empty() {
            return Err(Error::NoUncommittedEvents { stream_id });
        }
        let expected = C::expected_revision(aggregate.revision());

        let mut tx = self.store.begin(stream_id.as_str());
        tx.stage(aggregate.uncommitted_events().iter().map(|pending| {
            let message = Message::from_payload(pending.id, Arc::clone(&pending.payload))
                .with_header(header::STREAM_ID, stream_id.as_str());
            correlation.stamp(message)
        }));
        let committed = tx.commit(expected).await?;

        aggregate.state_mut().commit(committed);
        tracing::debug!(
            committed,
            revision = aggregate.revision(),
            "aggregate saved"
        );
        Ok(committed)
    }

    /// Snapshot the aggregate at its current revision under a fresh id.
    ///
    /// # Errors
    ///
    /// See [`save_snapshot_with_id`](Self::save_snapshot_with_id).
    pub async fn save_snapshot<A: Snapshotting>(
        &self,
        aggregate: &mut A,
    ) -> Result<SnapshotId, Error> {
        let id = SnapshotId::new();
        self.save_snapshot_with_id(aggregate, id).await?;
        Ok(id)
    }

    /// Snapshot the aggregate at its current revision and reset its
    /// events-since-snapshot count.
    ///
    /// An aggregate with unsaved events is refused rather than snapshotted:
    /// its state already includes those events, but the revision the
    /// snapshot would be stored under does not. Save first, then snapshot.
    ///
    /// # Errors
    ///
    /// Returns a stream-not-found error if the aggregate was never saved, and
    /// [`Error::UncommittedEventsPending`] if it has applied events that are
    /// not saved yet.
    #[tracing::instrument(skip(self, aggregate), fields(stream_id = aggregate.stream_id()))]
    pub async fn save_snapshot_with_id<A: Snapshotting>(
        &self,
        aggregate: &mut A,
        id: SnapshotId,
    ) -> Result<(), Error> {
        let stream_id = aggregate.stream_id().to_owned();
        if !aggregate.uncommitted_events().is_empty() {
            if !self.store.stream_exists(&stream_id).await? {
                return Err(store::Error::StreamNotFound { stream_id }.into());
            }
            return Err(Error::UncommittedEventsPending { stream_id });
        }

        let snapshot = Snapshot::new(id, aggregate.revision(), aggregate.take_snapshot());
        self.store
            .add_snapshot(&stream_id, &aggregate.snapshot_stream_id(), snapshot)
            .await?;
        aggregate.state_mut().snapshot_taken();
        tracing::debug!(revision = aggregate.revision(), "snapshot saved");
        Ok(())
    }
}
