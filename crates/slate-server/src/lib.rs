// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Authoritative side of the Slate whiteboard: the server board, numbered
//! checkpoint snapshots, and the broadcast router the hub binary drives.

mod checkpoint;
mod router;
mod state;

pub use checkpoint::{CheckpointError, CheckpointStore, FsCheckpointStore, MemoryCheckpointStore};
pub use router::{BoardRouter, Outbound, RouteTarget};
pub use state::ServerBoard;

use slate_state::StateError;
use thiserror::Error;

/// Failures surfaced by the hub-side board.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Replicated-state protocol failure.
    #[error(transparent)]
    State(#[from] StateError),
    /// Checkpoint storage failure.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
