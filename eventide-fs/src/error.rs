use std::path::PathBuf;

/// Error type for file-backed store operations.
///
/// Surfaced to callers of the `EventStore` trait as
/// `eventide_core::store::Error::Backend`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading, writing or creating a file failed.
    #[error("i/o error on `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// An event or snapshot could not be serialised before writing.
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    /// A complete line could not be decoded, which indicates corruption.
    #[error("deserialization error in `{}` line {line}: {source}", path.display())]
    Deserialization {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    /// Another handle, in this process or another one, has the root open.
    #[error("store root is already open elsewhere: `{}` is locked", path.display())]
    Locked { path: PathBuf },
    /// A record names another stream than the file it was read from.
    #[error("`{}` holds a record of `{found}`, expected `{expected}`", path.display())]
    ForeignRecord {
        path: PathBuf,
        expected: String,
        found: String,
    },
    /// A stored payload does not match the type it is read back as.
    #[error("`{name}` could not be decoded: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<Error> for eventide_core::store::Error {
    fn from(err: Error) -> Self {
        Self::backend(err)
    }
}
