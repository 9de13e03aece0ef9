//! The aggregate engine.
//!
//! An aggregate is a domain object backed by one event stream. Business
//! methods record what happened by calling [`Aggregate::apply`], which queues
//! the event for the next save and immediately routes it through the
//! aggregate's [`Dispatcher`] so state is current before `apply` returns.
//! The bookkeeping (stream id, revision, events since the last snapshot,
//! uncommitted queue) lives in an embedded [`AggregateState`].

use std::sync::Arc;

use thiserror::Error;

use crate::{
    dispatch::{Dispatcher, Handlers},
    event::{DomainEvent, EventId, EventPayload, EventRegistry},
    store::Message,
};

/// Snapshot threshold used by [`AggregateState::new`].
pub const DEFAULT_SNAPSHOT_THRESHOLD: u64 = 25;

/// Invalid aggregate construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("stream id must not be blank")]
    BlankStreamId,
    #[error("snapshot threshold must be at least 1, got {0}")]
    InvalidSnapshotThreshold(u64),
}

/// Rejected call to [`Aggregate::apply_with_id`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("event id must not be nil")]
    NilEventId,
}

/// An event applied to an aggregate but not yet saved.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub id: EventId,
    pub payload: Arc<dyn EventPayload>,
}

impl PendingEvent {
    /// Borrow the payload as a concrete event type.
    #[must_use]
    pub fn payload<E: EventPayload>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

/// Persistence bookkeeping embedded in every aggregate.
#[derive(Debug, Clone)]
pub struct AggregateState {
    stream_id: String,
    revision: u64,
    events_since_snapshot: u64,
    snapshot_threshold: u64,
    uncommitted: Vec<PendingEvent>,
}

impl AggregateState {
    /// Fresh state at revision 0 with the default snapshot threshold.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::BlankStreamId`] if `stream_id` is empty
    /// or whitespace.
    pub fn new(stream_id: impl Into<String>) -> Result<Self, ConfigurationError> {
        Self::with_snapshot_threshold(stream_id, DEFAULT_SNAPSHOT_THRESHOLD)
    }

    /// Fresh state that reports readiness for a snapshot every
    /// `snapshot_threshold` events.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if `stream_id` is blank or
    /// `snapshot_threshold` is zero.
    pub fn with_snapshot_threshold(
        stream_id: impl Into<String>,
        snapshot_threshold: u64,
    ) -> Result<Self, ConfigurationError> {
        let stream_id = stream_id.into();
        if stream_id.trim().is_empty() {
            return Err(ConfigurationError::BlankStreamId);
        }
        if snapshot_threshold == 0 {
            return Err(ConfigurationError::InvalidSnapshotThreshold(snapshot_threshold));
        }
        Ok(Self {
            stream_id,
            revision: 0,
            events_since_snapshot: 0,
            snapshot_threshold,
            uncommitted: Vec::new(),
        })
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Number of committed events this state reflects.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub const fn events_since_snapshot(&self) -> u64 {
        self.events_since_snapshot
    }

    #[must_use]
    pub const fn snapshot_threshold(&self) -> u64 {
        self.snapshot_threshold
    }

    #[must_use]
    pub fn uncommitted(&self) -> &[PendingEvent] {
        &self.uncommitted
    }

    pub(crate) fn record(&mut self, event: PendingEvent) {
        self.uncommitted.push(event);
        self.events_since_snapshot += 1;
    }

    pub(crate) const fn record_replayed(&mut self) {
        self.revision += 1;
        self.events_since_snapshot += 1;
    }

    /// Mark the uncommitted queue as saved: `committed` events were appended.
    pub(crate) fn commit(&mut self, committed: u64) {
        self.revision += committed;
        self.uncommitted.clear();
    }

    pub(crate) const fn restore_at(&mut self, revision: u64) {
        self.revision = revision;
        self.events_since_snapshot = 0;
    }

    pub(crate) const fn snapshot_taken(&mut self) {
        self.events_since_snapshot = 0;
    }
}

/// A domain object whose state is derived from its event stream.
///
/// Implementations embed an [`AggregateState`] and route events to
/// [`Handle`](crate::dispatch::Handle) implementations from
/// [`Self::register`]. `#[derive(Aggregate)]` writes all three required items.
///
/// ```ignore
/// #[derive(Aggregate)]
/// #[aggregate(events(FundsDeposited, FundsWithdrawn))]
/// pub struct Account {
///     #[aggregate(state)]
///     state: AggregateState,
///     balance: i64,
/// }
///
/// impl Account {
///     pub fn deposit(&mut self, amount: i64) {
///         self.apply(FundsDeposited { amount });
///     }
/// }
/// ```
// ANCHOR: aggregate_trait
pub trait Aggregate: Send + Sync + Sized + 'static {
    /// Declare the events and capabilities this aggregate reacts to.
    ///
    /// Called once per aggregate type per process.
    fn register(handlers: &mut Handlers<Self>);

    /// Declare the event types this aggregate persists, so serializing
    /// backends can decode them.
    fn register_events(_registry: &mut EventRegistry) {}

    fn state(&self) -> &AggregateState;

    fn state_mut(&mut self) -> &mut AggregateState;

    fn stream_id(&self) -> &str {
        self.state().stream_id()
    }

    fn revision(&self) -> u64 {
        self.state().revision()
    }

    fn events_since_snapshot(&self) -> u64 {
        self.state().events_since_snapshot()
    }

    fn uncommitted_events(&self) -> &[PendingEvent] {
        self.state().uncommitted()
    }

    /// `true` once at least the configured threshold of events has been
    /// applied or replayed since the last snapshot.
    fn is_ready_for_snapshot(&self) -> bool {
        let state = self.state();
        state.events_since_snapshot() >= state.snapshot_threshold()
    }

    /// Record `event` under a fresh id and update state.
    fn apply<E: DomainEvent>(&mut self, event: E) {
        apply_payload(self, EventId::new(), Arc::new(event));
    }

    /// Record `event` under a caller-chosen id and update state.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::NilEventId`] for the nil id; nothing is recorded.
    fn apply_with_id<E: DomainEvent>(&mut self, event: E, id: EventId) -> Result<(), ApplyError> {
        if id.is_nil() {
            return Err(ApplyError::NilEventId);
        }
        apply_payload(self, id, Arc::new(event));
        Ok(())
    }
}
// ANCHOR_END: aggregate_trait

fn apply_payload<A: Aggregate>(aggregate: &mut A, id: EventId, payload: Arc<dyn EventPayload>) {
    aggregate.state_mut().record(PendingEvent {
        id,
        payload: Arc::clone(&payload),
    });
    Dispatcher::<A>::shared().dispatch(aggregate, payload.as_ref());
}

/// Re-apply committed messages, advancing the revision once per message.
///
/// Never touches the uncommitted queue.
pub(crate) fn replay<A: Aggregate>(aggregate: &mut A, messages: &[Message]) {
    let dispatcher = Dispatcher::<A>::shared();
    for message in messages {
        dispatcher.dispatch(aggregate, message.payload.as_ref());
        aggregate.state_mut().record_replayed();
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::dispatch::Handle;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Incremented {
        by: i64,
    }

    impl DomainEvent for Incremented {
        const KIND: &'static str = "incremented";
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Annotated {
        note: String,
    }

    impl DomainEvent for Annotated {
        const KIND: &'static str = "annotated";
    }

    #[derive(Debug)]
    struct Tally {
        state: AggregateState,
        total: i64,
    }

    impl Tally {
        fn with_threshold(threshold: u64) -> Self {
            Self {
                state: AggregateState::with_snapshot_threshold("tally-1", threshold).unwrap(),
                total: 0,
            }
        }

        fn increment(&mut self, by: i64) {
            self.apply(Incremented { by });
        }
    }

    impl Aggregate for Tally {
        fn register(handlers: &mut Handlers<Self>) {
            handlers.event::<Incremented>();
        }

        fn state(&self) -> &AggregateState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut AggregateState {
            &mut self.state
        }
    }

    impl Handle<Incremented> for Tally {
        fn handle(&mut self, event: &Incremented) {
            self.total += event.by;
        }
    }

    fn message(event: impl DomainEvent) -> Message {
        Message::new(event)
    }

    #[test]
    fn construction_rejects_invalid_parameters() {
        assert_eq!(
            AggregateState::new("  ").unwrap_err(),
            ConfigurationError::BlankStreamId
        );
        assert_eq!(
            AggregateState::with_snapshot_threshold("s", 0).unwrap_err(),
            ConfigurationError::InvalidSnapshotThreshold(0)
        );
        let state = AggregateState::new("s").unwrap();
        assert_eq!(state.snapshot_threshold(), DEFAULT_SNAPSHOT_THRESHOLD);
        assert_eq!(state.revision(), 0);
        assert_eq!(state.events_since_snapshot(), 0);
    }

    #[test]
    fn apply_updates_state_and_queues_without_touching_revision() {
        let mut tally = Tally::with_threshold(25);
        for by in 1..=4 {
            tally.increment(by);
        }
        assert_eq!(tally.total, 10);
        assert_eq!(tally.revision(), 0);
        assert_eq!(tally.uncommitted_events().len(), 4);
        assert_eq!(tally.events_since_snapshot(), 4);
        assert_eq!(
            tally.uncommitted_events()[3]
                .payload::<Incremented>()
                .map(|e| e.by),
            Some(4)
        );
    }

    #[test]
    fn apply_with_id_rejects_nil_and_keeps_supplied_ids() {
        let mut tally = Tally::with_threshold(25);
        assert_eq!(
            tally.apply_with_id(Incremented { by: 1 }, EventId::nil()),
            Err(ApplyError::NilEventId)
        );
        assert!(tally.uncommitted_events().is_empty());
        assert_eq!(tally.total, 0);

        let id = EventId::new();
        tally.apply_with_id(Incremented { by: 2 }, id).unwrap();
        assert_eq!(tally.uncommitted_events()[0].id, id);
        assert_eq!(tally.total, 2);
    }

    #[test]
    fn unhandled_events_are_still_recorded() {
        let mut tally = Tally::with_threshold(25);
        tally.apply(Annotated {
            note: "audit".into(),
        });
        assert_eq!(tally.total, 0);
        assert_eq!(tally.uncommitted_events().len(), 1);
        assert_eq!(tally.events_since_snapshot(), 1);
    }

    #[test]
    fn replay_advances_revision_and_leaves_queue_alone() {
        let mut tally = Tally::with_threshold(25);
        tally.increment(100);
        replay(
            &mut tally,
            &[
                message(Incremented { by: 1 }),
                message(Annotated { note: "x".into() }),
                message(Incremented { by: 2 }),
            ],
        );
        assert_eq!(tally.revision(), 3);
        assert_eq!(tally.total, 103);
        assert_eq!(tally.uncommitted_events().len(), 1);
        assert_eq!(tally.events_since_snapshot(), 4);
    }

    #[test]
    fn snapshot_readiness_flips_at_threshold() {
        let mut tally = Tally::with_threshold(3);
        tally.increment(1);
        tally.increment(1);
        assert!(!tally.is_ready_for_snapshot());
        tally.increment(1);
        assert!(tally.is_ready_for_snapshot());
    }

    #[test]
    fn commit_advances_revision_and_clears_queue() {
        let mut tally = Tally::with_threshold(25);
        tally.increment(1);
        tally.increment(1);
        tally.state_mut().commit(2);
        assert_eq!(tally.revision(), 2);
        assert!(tally.uncommitted_events().is_empty());
        assert_eq!(tally.events_since_snapshot(), 2);

        tally.state_mut().restore_at(7);
        assert_eq!(tally.revision(), 7);
        assert_eq!(tally.events_since_snapshot(), 0);
    }
}
