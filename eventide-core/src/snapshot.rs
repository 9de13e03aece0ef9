//! Snapshot support for faster aggregate loading.
//!
//! A snapshot is aggregate-defined state captured at a specific stream
//! revision. Loading from one restores that state and replays only the events
//! committed after it. This module provides:
//!
//! - [`Snapshot`] - Point-in-time aggregate state, tied to a revision
//! - [`Snapshotting`] - The capture/restore protocol an aggregate opts into
//! - [`SnapshotId`] - Identifier of a stored snapshot

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    aggregate::Aggregate,
    store::{Headers, header},
};

pub(crate) mod inmemory;

/// Requirements on a snapshot body.
///
/// Blanket-implemented; any cloneable serde type qualifies.
pub trait SnapshotBody:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> SnapshotBody for T where
    T: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Identifier of one stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Point-in-time snapshot of aggregate state.
///
/// `revision` is the number of events the body reflects: loading from the
/// snapshot replays events from that revision onwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub id: SnapshotId,
    pub revision: u64,
    pub body: T,
    #[serde(default)]
    pub headers: Headers,
}

impl<T: SnapshotBody> Snapshot<T> {
    #[must_use]
    pub fn new(id: SnapshotId, revision: u64, body: T) -> Self {
        Self {
            id,
            revision,
            body,
            headers: Headers::new(),
        }
    }

    /// Type path recorded for `T` in [`header::SNAPSHOT_TYPE`].
    #[must_use]
    pub fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }

    /// Write the store-owned headers. Called by backends when the snapshot is
    /// added. The id and revision are fields, so they are not repeated here.
    pub fn stamp_metadata(&mut self, stream_id: &str) {
        self.headers
            .insert(header::STREAM_ID.to_owned(), stream_id.into());
        self.headers
            .insert(header::SNAPSHOT_TYPE.to_owned(), Self::type_name().into());
    }
}

/// Name of the snapshot history kept for an event stream.
#[must_use]
pub fn snapshot_stream_id(stream_id: &str) -> String {
    format!("{stream_id}-snapshot")
}

/// Capture and restore of aggregate state.
///
/// ```ignore
/// impl Snapshotting for Account {
///     type Snapshot = AccountSnapshot;
///
///     fn take_snapshot(&self) -> AccountSnapshot {
///         AccountSnapshot { balance: self.balance }
///     }
///
///     fn restore_from_snapshot(&mut self, snapshot: AccountSnapshot) {
///         self.balance = snapshot.balance;
///     }
/// }
/// ```
// ANCHOR: snapshotting_trait
pub trait Snapshotting: Aggregate {
    type Snapshot: SnapshotBody;

    fn take_snapshot(&self) -> Self::Snapshot;

    /// Replace derived state with a captured body. Revision bookkeeping is
    /// handled by the repository.
    fn restore_from_snapshot(&mut self, snapshot: Self::Snapshot);

    fn snapshot_stream_id(&self) -> String {
        snapshot_stream_id(self.stream_id())
    }
}
// ANCHOR_END: snapshotting_trait
