//! Snapshot histories: one file per history, the latest line wins.

use eventide_core::{
    snapshot::{Snapshot, SnapshotBody},
    store::{self, header},
};

use crate::{
    Error, Store,
    record::{self, SnapshotRecord},
};

impl SnapshotRecord {
    fn body_type(&self) -> Option<&str> {
        self.headers
            .get(header::SNAPSHOT_TYPE)
            .and_then(serde_json::Value::as_str)
    }
}

impl Store {
    #[tracing::instrument(skip(self, snapshot), fields(revision = snapshot.revision))]
    pub(crate) async fn append_snapshot<T: SnapshotBody>(
        &self,
        stream_id: &str,
        snapshot_stream_id: &str,
        mut snapshot: Snapshot<T>,
    ) -> Result<(), store::Error> {
        let Some(stream_revision) = self.stream_revision(stream_id).await? else {
            return Err(store::Error::StreamNotFound {
                stream_id: stream_id.to_owned(),
            });
        };
        if snapshot.revision > stream_revision {
            return Err(store::Error::InvalidSnapshotRevision {
                stream_id: stream_id.to_owned(),
                revision: snapshot.revision,
                stream_revision,
            });
        }
        snapshot.stamp_metadata(stream_id);
        let body = serde_json::to_value(&snapshot.body).map_err(Error::Serialization)?;
        let line = record::to_line(&SnapshotRecord {
            snapshot_stream_id: snapshot_stream_id.to_owned(),
            id: snapshot.id,
            revision: snapshot.revision,
            headers: snapshot.headers,
            body,
        })?;

        let lock = self.history_lock(snapshot_stream_id);
        let _guard = lock.lock().await;
        let path = self.history_path(snapshot_stream_id);
        let truncate_to = record::read_file(&path).await?.and_then(|bytes| {
            let valid_len = record::complete_len(&bytes);
            (valid_len < bytes.len()).then_some(valid_len as u64)
        });
        self.append_line(&path, &line, truncate_to).await?;
        tracing::info!("snapshot added");
        Ok(())
    }

    /// The last complete record of a history, if any.
    async fn latest_record(&self, snapshot_stream_id: &str) -> Result<Option<SnapshotRecord>, Error> {
        let lock = self.history_lock(snapshot_stream_id);
        let _guard = lock.lock().await;
        let path = self.history_path(snapshot_stream_id);
        let Some(bytes) = record::read_file(&path).await? else {
            return Ok(None);
        };
        let Some(latest) = record::parse_lines::<SnapshotRecord>(&path, &bytes)?.pop() else {
            return Ok(None);
        };
        record::check_owner(&path, snapshot_stream_id, &latest.snapshot_stream_id)?;
        Ok(Some(latest))
    }

    pub(crate) async fn latest_snapshot_is<T: SnapshotBody>(
        &self,
        snapshot_stream_id: &str,
    ) -> Result<bool, Error> {
        Ok(self
            .latest_record(snapshot_stream_id)
            .await?
            .is_some_and(|record| record.body_type() == Some(Snapshot::<T>::type_name())))
    }

    #[tracing::instrument(skip(self))]
    pub(crate) async fn latest_snapshot<T: SnapshotBody>(
        &self,
        snapshot_stream_id: &str,
    ) -> Result<Snapshot<T>, store::Error> {
        let Some(record) = self.latest_record(snapshot_stream_id).await? else {
            return Err(store::Error::StreamNotFound {
                stream_id: snapshot_stream_id.to_owned(),
            });
        };
        let expected = Snapshot::<T>::type_name();
        if record.body_type() != Some(expected) {
            return Err(store::Error::SnapshotTypeMismatch {
                snapshot_stream_id: snapshot_stream_id.to_owned(),
                expected,
                found: record.body_type().unwrap_or("<untyped>").to_owned(),
            });
        }
        let body = serde_json::from_value(record.body).map_err(|source| Error::Decode {
            name: expected.to_owned(),
            source,
        })?;
        tracing::debug!(revision = record.revision, "snapshot read");
        Ok(Snapshot {
            id: record.id,
            revision: record.revision,
            body,
            headers: record.headers,
        })
    }
}
