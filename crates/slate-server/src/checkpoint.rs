// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Numbered checkpoint snapshots.
//!
//! Storage is opaque to the rest of the hub: anything that can persist an
//! ordered shape list under a monotonically assigned number qualifies.
//! Two implementations ship here, an in-memory store for tests and small
//! sessions and a per-number blob-file store for durable hubs.

use slate_proto::{BoardShape, CheckpointId};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No snapshot saved under the requested number.
    #[error("checkpoint {0} does not exist")]
    NotFound(CheckpointId),
    /// I/O failure while reading or writing a snapshot blob.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Snapshot serialization failure.
    #[error("encode error: {0}")]
    Encode(String),
    /// Snapshot deserialization failure.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Storage port for numbered board snapshots.
pub trait CheckpointStore {
    /// Persist `shapes` under the next number, returning it. Numbers start
    /// at 1 and never repeat within a store.
    fn save(&mut self, shapes: &[BoardShape]) -> Result<CheckpointId, CheckpointError>;
    /// Load the snapshot saved under `checkpoint`.
    fn fetch(&self, checkpoint: CheckpointId) -> Result<Vec<BoardShape>, CheckpointError>;
    /// Number of snapshots saved so far.
    fn count(&self) -> CheckpointId;
}

impl<S: CheckpointStore + ?Sized> CheckpointStore for Box<S> {
    fn save(&mut self, shapes: &[BoardShape]) -> Result<CheckpointId, CheckpointError> {
        (**self).save(shapes)
    }

    fn fetch(&self, checkpoint: CheckpointId) -> Result<Vec<BoardShape>, CheckpointError> {
        (**self).fetch(checkpoint)
    }

    fn count(&self) -> CheckpointId {
        (**self).count()
    }
}

/// Keep snapshots in memory. Contents are gone when the hub exits.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: Vec<Vec<BoardShape>>,
}

impl MemoryCheckpointStore {
    /// New empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, shapes: &[BoardShape]) -> Result<CheckpointId, CheckpointError> {
        self.snapshots.push(shapes.to_vec());
        Ok(self.snapshots.len() as CheckpointId)
    }

    fn fetch(&self, checkpoint: CheckpointId) -> Result<Vec<BoardShape>, CheckpointError> {
        let index = usize::try_from(checkpoint)
            .ok()
            .and_then(|k| k.checked_sub(1))
            .ok_or(CheckpointError::NotFound(checkpoint))?;
        self.snapshots
            .get(index)
            .cloned()
            .ok_or(CheckpointError::NotFound(checkpoint))
    }

    fn count(&self) -> CheckpointId {
        self.snapshots.len() as CheckpointId
    }
}

/// Store snapshots as one CBOR blob file per number under a base directory.
#[derive(Debug)]
pub struct FsCheckpointStore {
    base: PathBuf,
    saved: CheckpointId,
}

impl FsCheckpointStore {
    /// Open (or create) a store rooted at `base`. Existing blob files are
    /// counted so numbering resumes where a previous hub left off.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        let saved = highest_saved(&base)?;
        Ok(Self { base, saved })
    }

    /// Directory the blobs live in.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, checkpoint: CheckpointId) -> PathBuf {
        self.base.join(format!("checkpoint-{checkpoint}.cbor"))
    }
}

fn highest_saved(base: &Path) -> Result<CheckpointId, CheckpointError> {
    let mut highest = 0;
    for entry in fs::read_dir(base)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let number = name
            .strip_prefix("checkpoint-")
            .and_then(|rest| rest.strip_suffix(".cbor"))
            .and_then(|digits| digits.parse::<CheckpointId>().ok());
        if let Some(number) = number {
            highest = highest.max(number);
        }
    }
    Ok(highest)
}

impl CheckpointStore for FsCheckpointStore {
    fn save(&mut self, shapes: &[BoardShape]) -> Result<CheckpointId, CheckpointError> {
        let next = self.saved + 1;
        let mut blob = Vec::new();
        ciborium::ser::into_writer(&shapes, &mut blob)
            .map_err(|e| CheckpointError::Encode(e.to_string()))?;
        fs::write(self.path_for(next), blob)?;
        self.saved = next;
        Ok(next)
    }

    fn fetch(&self, checkpoint: CheckpointId) -> Result<Vec<BoardShape>, CheckpointError> {
        let blob = match fs::read(self.path_for(checkpoint)) {
            Ok(blob) => blob,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(checkpoint));
            }
            Err(err) => return Err(CheckpointError::Io(err)),
        };
        ciborium::de::from_reader(blob.as_slice()).map_err(|e| CheckpointError::Decode(e.to_string()))
    }

    fn count(&self) -> CheckpointId {
        self.saved
    }
}
