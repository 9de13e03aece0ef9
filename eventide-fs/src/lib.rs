//! File-backed event sourcing implementation.
//!
//! This crate provides [`Store`], an implementation of
//! [`eventide_core::store::EventStore`] that keeps every stream and snapshot
//! history in its own JSON-lines file under a root directory:
//!
//! ```text
//! <root>/eventide.lock                       held while a handle is open
//! <root>/streams/<hex(stream id)>.jsonl     one line per committed batch
//! <root>/snapshots/<hex(history id)>.jsonl one line per snapshot
//! ```
//!
//! Ids longer than 100 bytes are named `sha256-<hex digest>.jsonl` instead;
//! every line records the id it belongs to.
//!
//! A batch is one line, written with a single write, so a crash mid-commit
//! leaves at most a torn final line. Torn lines are ignored when reading and
//! cut off before the next write to the same file.

mod error;
mod record;
mod snapshot;
mod store;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use crate::{error::Error, store::Store};

/// Where and how a [`Store`] keeps its files.
///
/// Deserializable so it can sit in an application's configuration file:
///
/// ```
/// let options: eventide_fs::Options =
///     serde_json::from_str(r#"{ "root": "/var/lib/orders" }"#).unwrap();
/// assert!(!options.sync_writes);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Directory holding `streams/` and `snapshots/`. Created if missing.
    pub root: PathBuf,
    /// `fsync` every write before reporting success.
    #[serde(default)]
    pub sync_writes: bool,
}

impl Options {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sync_writes: false,
        }
    }

    #[must_use]
    pub const fn sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}
