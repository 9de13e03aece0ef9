#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use eventide_core::test;
pub use eventide_core::{
    aggregate,
    aggregate::{Aggregate, AggregateState, PendingEvent},
    codec, concurrency,
    concurrency::ConcurrencyConflict,
    dispatch,
    dispatch::Handle,
    event,
    event::{DomainEvent, EventId, EventRegistry},
    repository,
    repository::{Correlation, Repository},
};
// Re-export proc macro derives so consumers only depend on `eventide`.
pub use eventide_macros::Aggregate;

pub mod store {

    pub use eventide_core::store::{
        Error, EventSlice, EventStore, ExpectedRevision, Headers, Message, NonEmpty, ReadTo,
        Transaction, header,
    };

    #[cfg(feature = "fs")]
    #[cfg_attr(docsrs, doc(cfg(feature = "fs")))]
    pub mod fs {
        pub use eventide_fs::{Error, Options, Store};
    }

    pub use eventide_core::store::inmemory;
}

pub mod snapshot {

    pub use eventide_core::snapshot::{
        Snapshot, SnapshotBody, SnapshotId, Snapshotting, snapshot_stream_id,
    };
}

pub use snapshot::Snapshotting;
