//! On-disk line formats and the helpers shared by stream and snapshot files.

use std::{
    fmt::Write as _,
    io,
    path::{Path, PathBuf},
};

use eventide_core::{
    codec::{Codec, JsonCodec},
    event::EventId,
    snapshot::SnapshotId,
    store::Headers,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::Error;

/// One event inside a committed batch.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EventRecord {
    pub id: EventId,
    pub kind: String,
    #[serde(default)]
    pub headers: Headers,
    pub data: Value,
}

/// One line of a stream file: a whole committed batch.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CommitRecord {
    pub stream_id: String,
    pub events: Vec<EventRecord>,
}

/// One line of a snapshot history file.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotRecord {
    pub snapshot_stream_id: String,
    pub id: SnapshotId,
    pub revision: u64,
    #[serde(default)]
    pub headers: Headers,
    pub body: Value,
}

/// Ids up to this many bytes are spelled out in their file name.
const MAX_SPELLED_ID_LEN: usize = 100;

/// File name for an arbitrary stream id: lowercase hex of its UTF-8 bytes,
/// or `sha256-` and the hex SHA-256 digest for ids too long to spell out.
/// The two forms cannot collide since hex names never contain `-`.
///
/// Records carry their id, so a digest collision is caught on read.
pub(crate) fn file_name(id: &str) -> String {
    let mut name = if id.len() <= MAX_SPELLED_ID_LEN {
        hex(id.as_bytes())
    } else {
        format!("sha256-{}", hex(&Sha256::digest(id.as_bytes())))
    };
    name.push_str(".jsonl");
    name
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Fail unless a record read from `path` belongs to `expected`.
pub(crate) fn check_owner(path: &Path, expected: &str, found: &str) -> Result<(), Error> {
    if expected == found {
        return Ok(());
    }
    Err(Error::ForeignRecord {
        path: PathBuf::from(path),
        expected: expected.to_owned(),
        found: found.to_owned(),
    })
}

/// Whole file contents, or `None` if the file does not exist.
pub(crate) async fn read_file(path: &Path) -> Result<Option<Vec<u8>>, Error> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::io(path, err)),
    }
}

/// Length of the prefix made of newline-terminated lines. Anything after it
/// is a torn write.
pub(crate) fn complete_len(bytes: &[u8]) -> usize {
    bytes.iter().rposition(|b| *b == b'\n').map_or(0, |last| last + 1)
}

/// Decode every complete, non-empty line.
pub(crate) fn parse_lines<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<Vec<T>, Error> {
    bytes[..complete_len(bytes)]
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(index, line)| {
            JsonCodec.deserialize(line).map_err(|source| Error::Deserialization {
                path: PathBuf::from(path),
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Serialise `record` as one line.
pub(crate) fn to_line<T: Serialize>(record: &T) -> Result<Vec<u8>, Error> {
    let mut line = JsonCodec.serialize(record).map_err(Error::Serialization)?;
    line.push(b'\n');
    Ok(line)
}
