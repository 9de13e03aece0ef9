mod commit;
mod load;

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use eventide_core::{
    event::{EventId, EventRegistry},
    snapshot::{Snapshot, SnapshotBody},
    store::{self, EventSlice, EventStore, ExpectedRevision, Message, NonEmpty, ReadTo},
};
use fs2::FileExt;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

use crate::{Error, Options, record};

const STREAMS_DIR: &str = "streams";
const SNAPSHOTS_DIR: &str = "snapshots";
const LOCK_FILE: &str = "eventide.lock";

/// What the store knows about one stream file, rebuilt from disk on first use.
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    len: u64,
    seen: HashSet<EventId>,
    /// Byte length of the complete lines.
    valid_len: u64,
    /// The file ends in a partial line that must be cut before appending.
    torn: bool,
}

impl StreamState {
    const fn revision(&self) -> Option<u64> {
        if self.len == 0 { None } else { Some(self.len) }
    }
}

/// Per-file lock. The state is `None` until loaded, and reset to `None` when
/// a write fails so the next user rescans the file.
type StreamSlot = Arc<tokio::sync::Mutex<Option<StreamState>>>;
type HistoryLock = Arc<tokio::sync::Mutex<()>>;

struct Inner {
    root: PathBuf,
    sync_writes: bool,
    registry: EventRegistry,
    streams: Mutex<HashMap<String, StreamSlot>>,
    histories: Mutex<HashMap<String, HistoryLock>>,
    /// Holds the exclusive lock on the root until the last clone is dropped.
    _root_lock: std::fs::File,
}

/// A file-backed [`EventStore`].
///
/// Payloads are stored as JSON and decoded through the [`EventRegistry`]
/// given to [`open`](Self::open); kinds missing from the registry come back as
/// `RawEvent`s. Cloning is cheap and clones share locks.
///
/// Stream state is cached per handle, so a root may only be open through one
/// handle at a time: [`open`](Self::open) takes an exclusive lock on
/// `<root>/eventide.lock` that is released when the last clone is dropped.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Open (creating if needed) the store rooted at `options.root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Locked`] if the root is already open through another
    /// handle, and [`Error::Io`] if the directories or the lock file cannot
    /// be created.
    #[tracing::instrument(skip(registry), fields(root = %options.root.display()))]
    pub async fn open(options: Options, registry: EventRegistry) -> Result<Self, Error> {
        for dir in [STREAMS_DIR, SNAPSHOTS_DIR] {
            let path = options.root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|source| Error::io(path, source))?;
        }
        let root_lock = lock_root(&options.root).await?;
        tracing::info!(sync_writes = options.sync_writes, "file store opened");
        Ok(Self {
            inner: Arc::new(Inner {
                root: options.root,
                sync_writes: options.sync_writes,
                registry,
                streams: Mutex::new(HashMap::new()),
                histories: Mutex::new(HashMap::new()),
                _root_lock: root_lock,
            }),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    #[must_use]
    pub fn registry(&self) -> &EventRegistry {
        &self.inner.registry
    }

    pub(crate) fn stream_path(&self, stream_id: &str) -> PathBuf {
        self.inner
            .root
            .join(STREAMS_DIR)
            .join(record::file_name(stream_id))
    }

    pub(crate) fn history_path(&self, snapshot_stream_id: &str) -> PathBuf {
        self.inner
            .root
            .join(SNAPSHOTS_DIR)
            .join(record::file_name(snapshot_stream_id))
    }

    fn slot(&self, stream_id: &str) -> StreamSlot {
        let mut streams = self
            .inner
            .streams
            .lock()
            .expect("file store lock poisoned");
        Arc::clone(streams.entry(stream_id.to_owned()).or_default())
    }

    pub(crate) fn history_lock(&self, snapshot_stream_id: &str) -> HistoryLock {
        let mut histories = self
            .inner
            .histories
            .lock()
            .expect("file store lock poisoned");
        Arc::clone(histories.entry(snapshot_stream_id.to_owned()).or_default())
    }

    /// Current revision, `None` while nothing has been committed.
    pub(crate) async fn stream_revision(&self, stream_id: &str) -> Result<Option<u64>, Error> {
        let slot = self.slot(stream_id);
        let mut guard = slot.lock().await;
        Ok(self.loaded(stream_id, &mut guard).await?.revision())
    }

    /// Append one line to `path`, first cutting the file back to
    /// `truncate_to` if given.
    pub(crate) async fn append_line(
        &self,
        path: &Path,
        line: &[u8],
        truncate_to: Option<u64>,
    ) -> Result<(), Error> {
        let io = |source| Error::io(path, source);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io)?;
        if let Some(len) = truncate_to {
            file.set_len(len).await.map_err(io)?;
            tracing::warn!(path = %path.display(), len, "truncated torn write");
        }
        file.write_all(line).await.map_err(io)?;
        file.flush().await.map_err(io)?;
        if self.inner.sync_writes {
            file.sync_data().await.map_err(io)?;
        }
        Ok(())
    }
}

/// Take the exclusive lock on `<root>/eventide.lock` without waiting.
async fn lock_root(root: &Path) -> Result<std::fs::File, Error> {
    let path = root.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .await
        .map_err(|source| Error::io(&path, source))?
        .into_std()
        .await;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(file),
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            tracing::warn!(path = %path.display(), "store root is locked by another handle");
            Err(Error::Locked { path })
        }
        Err(err) => Err(Error::io(path, err)),
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.inner.root)
            .field("sync_writes", &self.inner.sync_writes)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl EventStore for Store {
    async fn stream_exists(&self, stream_id: &str) -> Result<bool, store::Error> {
        Ok(self.stream_revision(stream_id).await?.is_some())
    }

    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedRevision,
        messages: NonEmpty<Message>,
    ) -> Result<u64, store::Error> {
        self.append_batch(stream_id, expected, messages).await
    }

    async fn read_events(
        &self,
        stream_id: &str,
        from: u64,
        to: ReadTo,
    ) -> Result<EventSlice, store::Error> {
        self.read_range(stream_id, from, to).await
    }

    async fn add_snapshot<T: SnapshotBody>(
        &self,
        stream_id: &str,
        snapshot_stream_id: &str,
        snapshot: Snapshot<T>,
    ) -> Result<(), store::Error> {
        self.append_snapshot(stream_id, snapshot_stream_id, snapshot)
            .await
    }

    async fn snapshot_exists<T: SnapshotBody>(
        &self,
        snapshot_stream_id: &str,
    ) -> Result<bool, store::Error> {
        Ok(self.latest_snapshot_is::<T>(snapshot_stream_id).await?)
    }

    async fn read_snapshot<T: SnapshotBody>(
        &self,
        snapshot_stream_id: &str,
    ) -> Result<Snapshot<T>, store::Error> {
        self.latest_snapshot(snapshot_stream_id).await
    }
}
