use std::collections::HashSet;

use eventide_core::store::{self, ExpectedRevision, Message, NonEmpty};

use super::Store;
use crate::{
    Error,
    record::{self, CommitRecord, EventRecord},
};

impl Store {
    /// Check `expected` and write the new messages of `messages` as one line.
    ///
    /// The stream lock is held from the precondition check until the line is
    /// on disk, so no other append can slip in between.
    #[tracing::instrument(skip(self, messages), fields(event_count = messages.len()))]
    pub(in crate::store) async fn append_batch(
        &self,
        stream_id: &str,
        expected: ExpectedRevision,
        messages: NonEmpty<Message>,
    ) -> Result<u64, store::Error> {
        let slot = self.slot(stream_id);
        let mut guard = slot.lock().await;
        let state = self.loaded(stream_id, &mut guard).await?;
        expected.check(stream_id, state.revision())?;

        let mut batch_ids = HashSet::new();
        let mut events = Vec::with_capacity(messages.len());
        for mut message in messages {
            if state.seen.contains(&message.id) || !batch_ids.insert(message.id) {
                tracing::debug!(event_id = %message.id, "skipping duplicate event id");
                continue;
            }
            message.stamp_type_metadata();
            let data = message.payload.to_json().map_err(Error::Serialization)?;
            let kind = message.kind().to_owned();
            events.push(EventRecord {
                id: message.id,
                kind,
                headers: message.headers,
                data,
            });
        }
        if events.is_empty() {
            tracing::info!(revision = state.len, "every event was already stored");
            return Ok(0);
        }

        let appended = events.len() as u64;
        let line = record::to_line(&CommitRecord {
            stream_id: stream_id.to_owned(),
            events,
        })?;
        let path = self.stream_path(stream_id);
        let truncate_to = state.torn.then_some(state.valid_len);
        if let Err(err) = self.append_line(&path, &line, truncate_to).await {
            // The file may hold part of the line now; rescan before the next use.
            *guard = None;
            return Err(err.into());
        }

        state.len += appended;
        state.valid_len += line.len() as u64;
        state.torn = false;
        state.seen.extend(batch_ids);
        tracing::info!(appended, revision = state.len, "events appended to stream");
        Ok(appended)
    }
}
