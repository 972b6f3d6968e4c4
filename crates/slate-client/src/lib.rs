// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client side of the Slate whiteboard: the replicated board, the undo/redo
//! engine, the hub connector, and the input-facing session shell.

mod comm;
mod facade;
mod state;

pub use comm::{BusConnector, BusHandle, CommError, EnvelopeSink, UpdateSender};
pub use facade::{wall_clock_millis, BoardSession, SessionMode};
pub use state::{BoardListener, ClientBoard, NullSender};

use slate_state::StateError;
use thiserror::Error;

/// Failures surfaced by the client board.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Replicated-state protocol failure, including the synchronization
    /// error raised when a data envelope arrives from a foreign
    /// generation (resubscribe to recover).
    #[error(transparent)]
    State(#[from] StateError),
    /// Transport failure on the way to the hub.
    #[error(transparent)]
    Comm(#[from] CommError),
}
