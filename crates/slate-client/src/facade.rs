// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Input-side dispatch shell over the client board.
//!
//! The session is either Active (input flows through to the board) or
//! Inactive (input is absorbed). Everything else is a thin forwarding
//! layer; the board owns all semantics.

use crate::state::ClientBoard;
use crate::comm::UpdateSender;
use crate::ClientError;
use slate_proto::{BoardShape, CheckpointId, Operation, Shape, ShapeId, Timestamp, UxShape};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Whether a session currently accepts input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Input operations are forwarded to the board.
    Active,
    /// Input operations are dropped.
    Inactive,
}

/// Milliseconds since the Unix epoch, used to stamp fresh edits.
pub fn wall_clock_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            Timestamp::try_from(elapsed.as_millis()).unwrap_or(Timestamp::MAX)
        })
}

/// Active/Inactive dispatch shell for one participant's input.
pub struct BoardSession<T> {
    board: Arc<ClientBoard<T>>,
    mode: SessionMode,
}

impl<T: UpdateSender> BoardSession<T> {
    /// New session over `board`, initially Active.
    pub fn new(board: Arc<ClientBoard<T>>) -> Self {
        Self {
            board,
            mode: SessionMode::Active,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Start forwarding input to the board.
    pub fn activate(&mut self) {
        self.mode = SessionMode::Active;
    }

    /// Stop forwarding input; the board keeps receiving hub broadcasts.
    pub fn deactivate(&mut self) {
        self.mode = SessionMode::Inactive;
    }

    /// The board behind this session.
    pub fn board(&self) -> &Arc<ClientBoard<T>> {
        &self.board
    }

    /// Create a new shape under `id`, stamped now.
    pub fn draw(&self, shape: Shape, id: impl Into<ShapeId>) -> Result<bool, ClientError> {
        if self.absorb("draw") {
            return Ok(false);
        }
        let record = BoardShape::new(
            shape,
            id,
            self.board.user(),
            self.board.level(),
            wall_clock_millis(),
        );
        self.board.save_operation(record)
    }

    /// Replace the geometry of the shape under `id`, stamped now.
    pub fn reshape(&self, id: &str, shape: Shape) -> Result<bool, ClientError> {
        if self.absorb("reshape") {
            return Ok(false);
        }
        let Some(mut record) = self.board.shape(id) else {
            return Ok(false);
        };
        record.shape = shape;
        let record = record.stamped(Operation::Modify, wall_clock_millis());
        self.board.save_operation(record)
    }

    /// Remove the shape under `id`.
    pub fn erase(&self, id: &str) -> Result<bool, ClientError> {
        if self.absorb("erase") {
            return Ok(false);
        }
        let Some(record) = self.board.shape(id) else {
            return Ok(false);
        };
        let record = record.stamped(Operation::Delete, wall_clock_millis());
        self.board.save_operation(record)
    }

    /// Undo the most recent local edit.
    pub fn undo(&self) -> Result<Vec<UxShape>, ClientError> {
        if self.absorb("undo") {
            return Ok(Vec::new());
        }
        self.board.undo()
    }

    /// Re-apply the most recently undone edit.
    pub fn redo(&self) -> Result<Vec<UxShape>, ClientError> {
        if self.absorb("redo") {
            return Ok(Vec::new());
        }
        self.board.redo()
    }

    /// Ask the hub to clear the board for everyone.
    pub fn clear_board(&self) -> Result<(), ClientError> {
        if self.absorb("clear") {
            return Ok(());
        }
        self.board.clear_board()
    }

    /// Ask the hub to snapshot the board into a new checkpoint.
    pub fn create_checkpoint(&self) -> Result<(), ClientError> {
        if self.absorb("create_checkpoint") {
            return Ok(());
        }
        self.board.create_checkpoint()
    }

    /// Ask the hub to restore checkpoint `checkpoint` for everyone.
    pub fn fetch_checkpoint(&self, checkpoint: CheckpointId) -> Result<(), ClientError> {
        if self.absorb("fetch_checkpoint") {
            return Ok(());
        }
        self.board.fetch_checkpoint(checkpoint)
    }

    fn absorb(&self, what: &str) -> bool {
        if self.mode == SessionMode::Inactive {
            debug!(operation = what, "inactive session absorbed input");
            return true;
        }
        false
    }
}
