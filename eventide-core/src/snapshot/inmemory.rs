//! In-memory snapshot histories.
//!
//! Used by [`store::inmemory::Store`](crate::store::inmemory::Store). Bodies
//! are kept as their concrete type behind `dyn Any`, so a type check is a
//! `TypeId` comparison and nothing is serialized.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, RwLock},
};

use super::{Snapshot, SnapshotBody, SnapshotId};
use crate::store::{Error, Headers};

struct StoredSnapshot {
    id: SnapshotId,
    revision: u64,
    headers: Headers,
    body: Arc<dyn Any + Send + Sync>,
    body_type: TypeId,
    type_name: &'static str,
}

impl StoredSnapshot {
    fn new<T: SnapshotBody>(snapshot: Snapshot<T>) -> Self {
        Self {
            id: snapshot.id,
            revision: snapshot.revision,
            headers: snapshot.headers,
            body: Arc::new(snapshot.body),
            body_type: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    fn is<T: SnapshotBody>(&self) -> bool {
        self.body_type == TypeId::of::<T>()
    }

    fn to_snapshot<T: SnapshotBody>(&self) -> Option<Snapshot<T>> {
        let body = self.body.downcast_ref::<T>()?.clone();
        Some(Snapshot {
            id: self.id,
            revision: self.revision,
            body,
            headers: self.headers.clone(),
        })
    }
}

/// Snapshot histories keyed by snapshot stream id, newest last.
///
/// One lock covers every history; it is never held together with an event
/// stream lock.
#[derive(Default)]
pub(crate) struct Shelf {
    histories: RwLock<HashMap<String, Vec<StoredSnapshot>>>,
}

impl Shelf {
    pub(crate) fn push<T: SnapshotBody>(&self, snapshot_stream_id: &str, snapshot: Snapshot<T>) {
        self.histories
            .write()
            .expect("in-memory snapshot lock poisoned")
            .entry(snapshot_stream_id.to_owned())
            .or_default()
            .push(StoredSnapshot::new(snapshot));
    }

    pub(crate) fn latest_is<T: SnapshotBody>(&self, snapshot_stream_id: &str) -> bool {
        self.histories
            .read()
            .expect("in-memory snapshot lock poisoned")
            .get(snapshot_stream_id)
            .and_then(|history| history.last())
            .is_some_and(StoredSnapshot::is::<T>)
    }

    pub(crate) fn latest<T: SnapshotBody>(&self, snapshot_stream_id: &str) -> Result<Snapshot<T>, Error> {
        let histories = self
            .histories
            .read()
            .expect("in-memory snapshot lock poisoned");
        let Some(latest) = histories.get(snapshot_stream_id).and_then(|h| h.last()) else {
            return Err(Error::StreamNotFound {
                stream_id: snapshot_stream_id.to_owned(),
            });
        };
        latest
            .to_snapshot::<T>()
            .ok_or_else(|| Error::SnapshotTypeMismatch {
                snapshot_stream_id: snapshot_stream_id.to_owned(),
                expected: std::any::type_name::<T>(),
                found: latest.type_name.to_owned(),
            })
    }

    pub(crate) fn len(&self, snapshot_stream_id: &str) -> usize {
        self.histories
            .read()
            .expect("in-memory snapshot lock poisoned")
            .get(snapshot_stream_id)
            .map_or(0, Vec::len)
    }
}
