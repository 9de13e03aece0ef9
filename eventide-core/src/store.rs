//! Persistence layer abstractions.
//!
//! This module describes the storage contract ([`EventStore`]), the message
//! format streams are made of ([`Message`]), commit preconditions
//! ([`ExpectedRevision`]), read bounds ([`ReadTo`], [`EventSlice`]) and the
//! stage-then-commit [`Transaction`]. A reference in-memory implementation
//! lives in [`inmemory`].
//!
//! # Commit preconditions
//!
//! | expected        | stream absent        | stream present                  |
//! |-----------------|----------------------|---------------------------------|
//! | `Exact(n)`      | `StreamNotFound`     | ok iff length == `n`, else conflict |
//! | `New`/`Exact(0)`| stream is created    | ok iff length == 0, else conflict |
//! | `Any`           | stream is created    | ok                              |
//!
//! A stream exists once it holds at least one message.
use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

pub use nonempty::NonEmpty;
use serde_json::Value;
use thiserror::Error;

use crate::{
    concurrency::ConcurrencyConflict,
    event::{DomainEvent, EventId, EventPayload},
    snapshot::{Snapshot, SnapshotBody},
};

pub mod inmemory;

/// Message header keys written by the repository and the stores.
pub mod header {
    /// Stream the message was saved to (repository).
    pub const STREAM_ID: &str = "eventide-stream-id";
    /// Optional id of the message that caused this one (repository).
    pub const CAUSATION_ID: &str = "eventide-causation-id";
    /// Optional id grouping related messages (repository).
    pub const CONVERSATION_ID: &str = "eventide-conversation-id";
    /// Stable event kind (store).
    pub const EVENT_KIND: &str = "eventide-event-kind";
    /// Fully-qualified Rust type path of the payload (store).
    pub const EVENT_TYPE: &str = "eventide-event-type";
    /// Fully-qualified Rust type path of a snapshot body (store).
    pub const SNAPSHOT_TYPE: &str = "eventide-snapshot-type";
}

/// Free-form message metadata.
pub type Headers = BTreeMap<String, Value>;

/// One event as it travels to and from a stream.
///
/// The event id is a field, never a header.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: EventId,
    pub payload: Arc<dyn EventPayload>,
    pub headers: Headers,
}

impl Message {
    /// Wrap an event under a fresh id.
    #[must_use]
    pub fn new<E: DomainEvent>(event: E) -> Self {
        Self::with_id(EventId::new(), event)
    }

    #[must_use]
    pub fn with_id<E: DomainEvent>(id: EventId, event: E) -> Self {
        Self::from_payload(id, Arc::new(event))
    }

    #[must_use]
    pub fn from_payload(id: EventId, payload: Arc<dyn EventPayload>) -> Self {
        Self {
            id,
            payload,
            headers: Headers::new(),
        }
    }

    /// Add or replace a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    /// A header's value if it is a string.
    #[must_use]
    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.header(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Borrow the payload as a concrete event type.
    #[must_use]
    pub fn payload<E: EventPayload>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    /// Write the store-owned type headers. Called by backends on commit.
    pub fn stamp_type_metadata(&mut self) {
        self.headers
            .insert(header::EVENT_KIND.to_owned(), self.payload.kind().into());
        self.headers
            .insert(header::EVENT_TYPE.to_owned(), self.payload.type_name().into());
    }
}

/// Precondition for a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedRevision {
    /// The stream must hold exactly this many events. `Exact(0)` is `New`.
    Exact(u64),
    /// The stream must be absent or empty.
    New,
    /// No check: append to whatever the head is.
    Any,
}

impl ExpectedRevision {
    const fn normalized(self) -> Self {
        match self {
            Self::Exact(0) => Self::New,
            other => other,
        }
    }

    /// Evaluate the precondition against a stream's current length (`None`
    /// when the stream does not exist).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotFound`] when an exact non-zero revision is
    /// expected of an absent stream, and [`Error::Conflict`] when the stream
    /// exists at another revision.
    pub fn check(self, stream_id: &str, current: Option<u64>) -> Result<(), Error> {
        let conflict = |actual| {
            Err(Error::Conflict(ConcurrencyConflict {
                stream_id: stream_id.to_owned(),
                expected: self,
                actual,
            }))
        };
        match (self.normalized(), current) {
            (Self::Any | Self::New, None) | (Self::Any, Some(_)) | (Self::New, Some(0)) => Ok(()),
            (Self::Exact(expected), Some(actual)) if expected == actual => Ok(()),
            (Self::Exact(_), None) => Err(Error::StreamNotFound {
                stream_id: stream_id.to_owned(),
            }),
            (Self::Exact(_) | Self::New, Some(actual)) => conflict(actual),
        }
    }
}

impl fmt::Display for ExpectedRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(revision) => write!(f, "revision {revision}"),
            Self::New => f.write_str("new stream"),
            Self::Any => f.write_str("any revision"),
        }
    }
}

/// Upper bound of a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReadTo {
    /// Stop before this revision.
    Revision(u64),
    /// Read to the current end of the stream.
    #[default]
    End,
}

impl ReadTo {
    /// Resolve the bound against a stream of length `len` and validate the
    /// range `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if the bound lies beyond the stream or
    /// before `from`.
    pub fn resolve(self, stream_id: &str, from: u64, len: u64) -> Result<u64, Error> {
        let to = match self {
            Self::Revision(to) => to,
            Self::End => len,
        };
        if to > len || from > to {
            return Err(Error::InvalidRange {
                stream_id: stream_id.to_owned(),
                from,
                to,
                revision: len,
            });
        }
        Ok(to)
    }
}

impl From<u64> for ReadTo {
    fn from(revision: u64) -> Self {
        Self::Revision(revision)
    }
}

/// The result of a ranged read.
///
/// `to` is the resolved upper bound of the requested range, which is what a
/// bounded read reports as its revision. The stream's true length at the time
/// of the read is `stream_revision`; they coincide for reads to
/// [`ReadTo::End`].
#[derive(Debug, Clone)]
pub struct EventSlice {
    pub messages: Vec<Message>,
    pub from: u64,
    pub to: u64,
    pub stream_revision: u64,
}

impl EventSlice {
    #[must_use]
    pub const fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }
}

impl IntoIterator for EventSlice {
    type IntoIter = std::vec::IntoIter<Message>;
    type Item = Message;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventSlice {
    type IntoIter = std::slice::Iter<'a, Message>;
    type Item = &'a Message;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Store operation failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no event stream was found for id `{stream_id}`")]
    StreamNotFound { stream_id: String },
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    #[error("no messages were staged for stream `{stream_id}`")]
    NothingStaged { stream_id: String },
    #[error(
        "invalid read range [{from}, {to}) for stream `{stream_id}` at revision {revision}"
    )]
    InvalidRange {
        stream_id: String,
        from: u64,
        to: u64,
        revision: u64,
    },
    #[error(
        "latest snapshot in `{snapshot_stream_id}` is `{found}`, not the requested `{expected}`"
    )]
    SnapshotTypeMismatch {
        snapshot_stream_id: String,
        expected: &'static str,
        found: String,
    },
    #[error(
        "snapshot at revision {revision} is ahead of stream `{stream_id}` at revision \
         {stream_revision}"
    )]
    InvalidSnapshotRevision {
        stream_id: String,
        revision: u64,
        stream_revision: u64,
    },
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wrap an infrastructure failure.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Backend(err.into())
    }

    #[must_use]
    pub const fn is_stream_not_found(&self) -> bool {
        matches!(self, Self::StreamNotFound { .. })
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Buffered writes to one stream, committed as a single batch.
///
/// Messages staged on a transaction are invisible to readers until
/// [`commit`](Self::commit) succeeds. A failed commit keeps the buffer so the
/// caller can inspect it; dropping the transaction discards it.
pub struct Transaction<'a, S: EventStore> {
    store: &'a S,
    stream_id: String,
    staged: Vec<Message>,
}

impl<'a, S: EventStore> Transaction<'a, S> {
    pub fn new(store: &'a S, stream_id: impl Into<String>) -> Self {
        Self {
            store,
            stream_id: stream_id.into(),
            staged: Vec::new(),
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Add messages to the pending batch. May be called any number of times.
    pub fn stage(&mut self, messages: impl IntoIterator<Item = Message>) -> &mut Self {
        let before = self.staged.len();
        self.staged.extend(messages);
        tracing::trace!(
            stream_id = %self.stream_id,
            staged = self.staged.len() - before,
            "messages staged"
        );
        self
    }

    #[must_use]
    pub fn staged(&self) -> &[Message] {
        &self.staged
    }

    /// Atomically check `expected` and append the whole staged batch.
    ///
    /// Returns the number of messages appended (duplicates of ids already in
    /// the stream are skipped) and clears the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NothingStaged`] for an empty buffer, or whatever the
    /// store reports for the precondition or the write.
    pub async fn commit(&mut self, expected: ExpectedRevision) -> Result<u64, Error> {
        let Some(batch) = NonEmpty::from_slice(&self.staged) else {
            return Err(Error::NothingStaged {
                stream_id: self.stream_id.clone(),
            });
        };
        tracing::debug!(
            stream_id = %self.stream_id,
            event_count = batch.len(),
            %expected,
            "committing transaction"
        );
        let committed = self.store.append(&self.stream_id, expected, batch).await?;
        self.staged.clear();
        Ok(committed)
    }
}

impl<S: EventStore> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            tracing::trace!(
                stream_id = %self.stream_id,
                event_count = self.staged.len(),
                "transaction dropped without commit; discarding staged messages"
            );
        }
    }
}

impl<S: EventStore> fmt::Debug for Transaction<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("stream_id", &self.stream_id)
            .field("staged", &self.staged.len())
            .finish_non_exhaustive()
    }
}

/// Abstraction over the persistence layer for event streams and their
/// snapshot histories.
///
/// Every mutation of a single stream is serialized by the implementation: the
/// precondition check and the append in [`append`](Self::append) are one
/// atomic step, and a batch is appended entirely or not at all.
// ANCHOR: event_store_trait
pub trait EventStore: Send + Sync {
    /// Whether the stream holds at least one message.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures ([`Error::Backend`]).
    fn stream_exists(&self, stream_id: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Check `expected` and append `messages` as one unit.
    ///
    /// Messages whose id is already present in the stream (or earlier in the
    /// batch) are skipped. Store-owned type headers are written on each
    /// appended message. Returns the number of messages appended.
    ///
    /// # Errors
    ///
    /// See [`ExpectedRevision::check`].
    fn append(
        &self,
        stream_id: &str,
        expected: ExpectedRevision,
        messages: NonEmpty<Message>,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Read the committed messages in `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotFound`] for an absent stream and
    /// [`Error::InvalidRange`] for a range outside the stream.
    fn read_events(
        &self,
        stream_id: &str,
        from: u64,
        to: ReadTo,
    ) -> impl Future<Output = Result<EventSlice, Error>> + Send;

    /// Read the whole stream.
    ///
    /// # Errors
    ///
    /// See [`read_events`](Self::read_events).
    fn read_all(&self, stream_id: &str) -> impl Future<Output = Result<EventSlice, Error>> + Send {
        self.read_events(stream_id, 0, ReadTo::End)
    }

    /// Read from the start of the stream up to `to`.
    ///
    /// # Errors
    ///
    /// See [`read_events`](Self::read_events).
    fn read_to(
        &self,
        stream_id: &str,
        to: ReadTo,
    ) -> impl Future<Output = Result<EventSlice, Error>> + Send {
        self.read_events(stream_id, 0, to)
    }

    /// Append a snapshot of `stream_id` to the history at
    /// `snapshot_stream_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotFound`] if the event stream does not exist,
    /// or [`Error::InvalidSnapshotRevision`] if the snapshot claims a revision
    /// the stream has not reached.
    fn add_snapshot<T: SnapshotBody>(
        &self,
        stream_id: &str,
        snapshot_stream_id: &str,
        snapshot: Snapshot<T>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Whether the latest snapshot in the history is a `T`.
    ///
    /// A history whose latest snapshot has another body type reports
    /// `false`, the same as an absent or empty one.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures ([`Error::Backend`]).
    fn snapshot_exists<T: SnapshotBody>(
        &self,
        snapshot_stream_id: &str,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Read the latest snapshot in the history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamNotFound`] if there is no snapshot and
    /// [`Error::SnapshotTypeMismatch`] if the latest one is not a `T`.
    fn read_snapshot<T: SnapshotBody>(
        &self,
        snapshot_stream_id: &str,
    ) -> impl Future<Output = Result<Snapshot<T>, Error>> + Send;

    /// Start staging messages for `stream_id`.
    fn begin(&self, stream_id: impl Into<String>) -> Transaction<'_, Self>
    where
        Self: Sized,
    {
        Transaction::new(self, stream_id)
    }
}
// ANCHOR_END: event_store_trait

/// Convert a validated revision into a slice index.
pub(crate) fn index(revision: u64) -> usize {
    usize::try_from(revision).unwrap_or(usize::MAX)
}
