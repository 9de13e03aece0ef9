use std::path::Path;

use eventide_core::store::{self, EventSlice, Message, ReadTo};

use super::{Store, StreamState};
use crate::{
    Error,
    record::{self, CommitRecord, EventRecord},
};

/// Committed batches of a file, with the byte length of its complete lines
/// and whether anything follows them.
struct Scan {
    commits: Vec<CommitRecord>,
    valid_len: u64,
    torn: bool,
}

async fn scan_file(path: &Path, stream_id: &str) -> Result<Scan, Error> {
    let Some(bytes) = record::read_file(path).await? else {
        return Ok(Scan {
            commits: Vec::new(),
            valid_len: 0,
            torn: false,
        });
    };
    let valid_len = record::complete_len(&bytes);
    let commits: Vec<CommitRecord> = record::parse_lines(path, &bytes)?;
    for commit in &commits {
        record::check_owner(path, stream_id, &commit.stream_id)?;
    }
    Ok(Scan {
        commits,
        valid_len: valid_len as u64,
        torn: valid_len < bytes.len(),
    })
}

fn index(revision: u64) -> usize {
    usize::try_from(revision).unwrap_or(usize::MAX)
}

impl Store {
    /// The cached state of a stream, scanning its file on first use.
    pub(in crate::store) async fn loaded<'a>(
        &self,
        stream_id: &str,
        slot: &'a mut Option<StreamState>,
    ) -> Result<&'a mut StreamState, Error> {
        let state = match slot.take() {
            Some(state) => state,
            None => self.scan(stream_id).await?,
        };
        Ok(slot.insert(state))
    }

    async fn scan(&self, stream_id: &str) -> Result<StreamState, Error> {
        let scan = scan_file(&self.stream_path(stream_id), stream_id).await?;
        let mut state = StreamState {
            valid_len: scan.valid_len,
            torn: scan.torn,
            ..StreamState::default()
        };
        for event in scan.commits.iter().flat_map(|commit| &commit.events) {
            state.seen.insert(event.id);
            state.len += 1;
        }
        if scan.torn {
            tracing::warn!(stream_id, "stream file ends in a torn write");
        }
        tracing::debug!(stream_id, revision = state.len, "stream state loaded");
        Ok(state)
    }

    fn decode(&self, record: EventRecord) -> Result<Message, Error> {
        let payload = self
            .inner
            .registry
            .decode(&record.kind, record.data)
            .map_err(|source| Error::Decode {
                name: record.kind,
                source,
            })?;
        let mut message = Message::from_payload(record.id, payload);
        message.headers = record.headers;
        Ok(message)
    }

    #[tracing::instrument(skip(self))]
    pub(in crate::store) async fn read_range(
        &self,
        stream_id: &str,
        from: u64,
        to: ReadTo,
    ) -> Result<EventSlice, store::Error> {
        // Hold the stream lock so a concurrent append is seen whole or not at all.
        let slot = self.slot(stream_id);
        let _guard = slot.lock().await;

        let scan = scan_file(&self.stream_path(stream_id), stream_id).await?;
        let records: Vec<EventRecord> = scan
            .commits
            .into_iter()
            .flat_map(|commit| commit.events)
            .collect();
        if records.is_empty() {
            return Err(store::Error::StreamNotFound {
                stream_id: stream_id.to_owned(),
            });
        }
        let revision = records.len() as u64;
        let to = to.resolve(stream_id, from, revision)?;
        let messages = records
            .into_iter()
            .skip(index(from))
            .take(index(to - from))
            .map(|record| self.decode(record))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(from, to, read = messages.len(), "events read from stream");
        Ok(EventSlice {
            messages,
            from,
            to,
            stream_revision: revision,
        })
    }
}
