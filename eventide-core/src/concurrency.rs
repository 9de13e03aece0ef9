//! Concurrency strategy selection.
//!
//! The repository saves either with optimistic concurrency (the commit must
//! find the stream at the revision the aggregate was loaded at) or unchecked
//! (last writer wins). The two strategies are marker types so the choice is
//! made at compile time in [`Repository`](crate::repository::Repository).

use thiserror::Error;

use crate::store::ExpectedRevision;

/// No revision checking - last writer wins.
///
/// Events are appended at whatever the stream head is when the commit runs.
/// Only safe with a single writer per stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unchecked;

/// Optimistic concurrency control - revision checked on every write.
///
/// The commit fails with a [`ConcurrencyConflict`] if another writer advanced
/// the stream since the aggregate was loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Optimistic;

/// Sealed trait for concurrency strategy markers.
///
/// This trait cannot be implemented outside this crate, ensuring only
/// [`Unchecked`] and [`Optimistic`] can be used as concurrency strategies.
pub trait ConcurrencyStrategy: private::Sealed + Default + Send + Sync {
    /// Whether this strategy checks revisions before appending.
    const CHECK_REVISION: bool;

    /// Commit precondition for an aggregate last known at `revision`.
    fn expected_revision(revision: u64) -> ExpectedRevision;
}

impl ConcurrencyStrategy for Unchecked {
    const CHECK_REVISION: bool = false;

    fn expected_revision(_revision: u64) -> ExpectedRevision {
        ExpectedRevision::Any
    }
}

impl ConcurrencyStrategy for Optimistic {
    const CHECK_REVISION: bool = true;

    fn expected_revision(revision: u64) -> ExpectedRevision {
        ExpectedRevision::Exact(revision)
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Unchecked {}
    impl Sealed for super::Optimistic {}
}

/// Another writer advanced the stream first.
///
/// The core never retries: reload the aggregate, re-run the business logic
/// and save again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", format_conflict(.stream_id, .expected, .actual))]
pub struct ConcurrencyConflict {
    pub stream_id: String,
    /// The precondition the commit was made under.
    pub expected: ExpectedRevision,
    /// The stream's revision when the commit was rejected.
    pub actual: u64,
}

/// Build a human-readable message for a [`ConcurrencyConflict`], including an
/// actionable hint for the caller.
fn format_conflict(stream_id: &str, expected: &ExpectedRevision, actual: &u64) -> String {
    match expected {
        ExpectedRevision::New | ExpectedRevision::Exact(0) => format!(
            "concurrency conflict on `{stream_id}`: expected new stream, found revision \
             {actual} (hint: another process created this stream; reload and retry)"
        ),
        ExpectedRevision::Exact(expected) => format!(
            "concurrency conflict on `{stream_id}`: expected revision {expected}, found \
             {actual} (hint: stream was modified; reload and retry)"
        ),
        ExpectedRevision::Any => {
            format!("concurrency conflict on `{stream_id}`: unexpected conflict without a check")
        }
    }
}
