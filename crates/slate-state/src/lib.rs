// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Replica core for the Slate whiteboard.
//!
//! Both sides of the protocol keep the same structures: a shape map, a
//! render-order priority queue, deletion tombstones, and a generation
//! counter. This crate owns those structures plus the bounded undo/redo
//! history; the hub and client crates layer the protocol on top.

mod history;
mod queue;
mod replica;

pub use history::{HistoryEntry, UndoStack};
pub use queue::{QueueEntry, TimestampQueue};
pub use replica::Replica;

use slate_proto::{Generation, Operation, ShapeId};
use thiserror::Error;

/// Failures of the replicated-state protocol.
///
/// `DuplicateId`, `MissingId`, `MultiShapeUpdate` and `UnexpectedOperation`
/// are protocol-invariant violations: the offending envelope is rejected
/// and logged. `GenerationMismatch` means the replica fell out of sync and
/// should resubscribe. Intentional drops (stale or tombstoned updates) are
/// not errors; they surface as a `false` success flag instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Create of an id that is already live.
    #[error("duplicate shape id: {0}")]
    DuplicateId(ShapeId),
    /// Modify/Delete of an id that is neither live nor tombstoned.
    #[error("unknown shape id: {0}")]
    MissingId(ShapeId),
    /// A data envelope that does not carry exactly one shape.
    #[error("expected a single-shape update, got {0} shapes")]
    MultiShapeUpdate(usize),
    /// A data envelope from a different generation than ours.
    #[error("generation mismatch: local {local}, remote {remote}")]
    GenerationMismatch {
        /// Generation this replica is in.
        local: Generation,
        /// Generation the envelope was issued in.
        remote: Generation,
    },
    /// An operation routed to a handler that does not accept it.
    #[error("unexpected operation: {}", .0.op_name())]
    UnexpectedOperation(Operation),
    /// A clear issued by a participant without the High permission level.
    #[error("clearing the board requires the high permission level")]
    PermissionDenied,
}
