// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client-side board replica.
//!
//! One [`ClientBoard`] per participant. Local edits apply immediately,
//! record themselves in the undo history and go out through the
//! [`UpdateSender`]; hub broadcasts come back in through
//! [`on_message`](ClientBoard::on_message) and are reconciled against the
//! local replica. A single state lock serializes every mutation, and
//! listener callbacks run while it is held so the UI always observes a
//! coherent, non-interleaved delta sequence.
//!
//! # Render reordering
//!
//! When a remote Create or Modify lands with a timestamp older than some
//! locally present shapes, those later shapes are withdrawn from the view
//! and re-placed on top of the incoming one, so z-order keeps following
//! last-modified order. Undo and redo feed their synthesized inverse
//! operations through the same application path, so there is exactly one
//! implementation of that ordering rule.

use crate::comm::{CommError, UpdateSender};
use crate::ClientError;
use slate_proto::{
    BoardShape, CheckpointId, Generation, Operation, ShapeId, UpdateEnvelope, UserId, UserLevel,
    UxOp, UxShape, UNDO_REDO_STACK_SIZE,
};
use slate_state::{HistoryEntry, Replica, StateError, UndoStack};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Receiver of board deltas and board-level notifications.
///
/// `on_shapes` is the render feed; the other callbacks announce events
/// that carry no shapes. All callbacks run under the board's state lock.
pub trait BoardListener: Send + Sync {
    /// A batch of render deltas produced by one reconciled operation.
    fn on_shapes(&self, batch: &[UxShape]);

    /// The board was globally cleared into `generation`.
    fn on_board_cleared(&self, generation: Generation) {
        let _ = generation;
    }

    /// The hub-side checkpoint count changed.
    fn on_checkpoint_count(&self, count: CheckpointId) {
        let _ = count;
    }
}

struct BoardInner {
    replica: Replica,
    undo: UndoStack,
    redo: UndoStack,
    listeners: Vec<(String, Arc<dyn BoardListener>)>,
    checkpoints: CheckpointId,
}

impl BoardInner {
    fn new() -> Self {
        Self {
            replica: Replica::new(),
            undo: UndoStack::new(UNDO_REDO_STACK_SIZE),
            redo: UndoStack::new(UNDO_REDO_STACK_SIZE),
            listeners: Vec::new(),
            checkpoints: 0,
        }
    }
}

enum Direction {
    Undo,
    Redo,
}

/// The client state manager: replica, history, listeners, outbound seam.
pub struct ClientBoard<T> {
    user: UserId,
    level: UserLevel,
    sender: T,
    inner: Mutex<BoardInner>,
}

impl<T: UpdateSender> ClientBoard<T> {
    /// New board for `user` at `level`, sending through `sender`.
    pub fn new(user: impl Into<UserId>, level: UserLevel, sender: T) -> Self {
        Self {
            user: user.into(),
            level,
            sender,
            inner: Mutex::new(BoardInner::new()),
        }
    }

    /// Participant this board belongs to.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Permission level of the participant.
    pub fn level(&self) -> UserLevel {
        self.level
    }

    /// Register a listener under `name`, drop the current replica contents
    /// (every present id becomes a tombstone) and ask the hub for a fresh
    /// snapshot. Re-subscribing under the same name replaces the listener.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        listener: Arc<dyn BoardListener>,
    ) -> Result<(), ClientError> {
        let name = name.into();
        let generation;
        {
            let mut inner = self.lock();
            inner.replica.nullify();
            inner.undo.clear();
            inner.redo.clear();
            inner.listeners.retain(|(existing, _)| *existing != name);
            inner.listeners.push((name, listener));
            generation = inner.replica.generation();
        }
        self.sender.send_update(&UpdateEnvelope::request(
            Operation::FetchState,
            self.user.clone(),
            0,
            generation,
        ))?;
        Ok(())
    }

    /// Remove the listener registered under `name`.
    pub fn unsubscribe(&self, name: &str) {
        let mut inner = self.lock();
        inner.listeners.retain(|(existing, _)| existing != name);
    }

    /// Apply a user-originated edit locally, record it for undo, and
    /// forward it to the hub. Returns false (and does nothing) when the
    /// edit's precondition fails: Create of a live id, or Modify/Delete of
    /// an id that is missing or tombstoned.
    pub fn save_operation(&self, shape: BoardShape) -> Result<bool, ClientError> {
        let mut inner = self.lock();
        let entry = match shape.op {
            Operation::Create => {
                if inner.replica.contains(&shape.id) {
                    debug!(id = %shape.id, "create of a live id refused");
                    return Ok(false);
                }
                inner.replica.insert(shape.clone())?;
                HistoryEntry::new(None, Some(shape.clone()))
            }
            Operation::Modify => {
                if !inner.replica.contains(&shape.id) || inner.replica.is_tombstoned(&shape.id) {
                    debug!(id = %shape.id, "modify of an absent id refused");
                    return Ok(false);
                }
                let previous = inner.replica.replace(shape.clone())?;
                HistoryEntry::new(Some(previous), Some(shape.clone()))
            }
            Operation::Delete => {
                if !inner.replica.contains(&shape.id) || inner.replica.is_tombstoned(&shape.id) {
                    debug!(id = %shape.id, "delete of an absent id refused");
                    return Ok(false);
                }
                let removed = inner.replica.remove(&shape.id)?;
                HistoryEntry::new(Some(removed), None)
            }
            other => return Err(StateError::UnexpectedOperation(other).into()),
        };
        if let Some(entry) = entry {
            inner.undo.push(entry);
        }
        // a fresh edit invalidates everything that was undone
        inner.redo.clear();

        let generation = inner.replica.generation();
        let op = shape.op;
        self.sender
            .send_update(&UpdateEnvelope::single(shape, op, self.user.clone(), generation))?;
        Ok(true)
    }

    /// Ask the hub to clear the board into the next generation. Only High
    /// level participants may issue this; the local replica is untouched
    /// until the hub broadcast comes back.
    pub fn clear_board(&self) -> Result<(), ClientError> {
        if !self.level.may_clear() {
            return Err(StateError::PermissionDenied.into());
        }
        let next = self.lock().replica.generation() + 1;
        self.sender.send_update(&UpdateEnvelope::request(
            Operation::ClearState,
            self.user.clone(),
            0,
            next,
        ))?;
        Ok(())
    }

    /// Ask the hub to snapshot the current board into a new checkpoint.
    pub fn create_checkpoint(&self) -> Result<(), ClientError> {
        let generation = self.lock().replica.generation();
        self.sender.send_update(&UpdateEnvelope::request(
            Operation::CreateCheckpoint,
            self.user.clone(),
            0,
            generation,
        ))?;
        Ok(())
    }

    /// Ask the hub to restore checkpoint `checkpoint` for everyone.
    pub fn fetch_checkpoint(&self, checkpoint: CheckpointId) -> Result<(), ClientError> {
        let generation = self.lock().replica.generation();
        self.sender.send_update(&UpdateEnvelope::request(
            Operation::FetchCheckpoint,
            self.user.clone(),
            checkpoint,
            generation,
        ))?;
        Ok(())
    }

    /// Undo the most recent local operation. Returns the emitted render
    /// delta; empty when there is nothing (alive) left to undo.
    pub fn undo(&self) -> Result<Vec<UxShape>, ClientError> {
        self.roll(Direction::Undo)
    }

    /// Re-apply the most recently undone operation.
    pub fn redo(&self) -> Result<Vec<UxShape>, ClientError> {
        self.roll(Direction::Redo)
    }

    /// Reconcile one hub broadcast into the local replica.
    pub fn on_message(&self, env: &UpdateEnvelope) -> Result<(), ClientError> {
        match env.op {
            Operation::FetchState => {
                if env.requester != self.user {
                    return Ok(());
                }
                let mut inner = self.lock();
                inner.checkpoints = env.checkpoint;
                let batch = Self::install_snapshot(&mut inner, env)?;
                Self::notify_shapes(&inner, &batch);
                Ok(())
            }
            Operation::FetchCheckpoint => {
                let mut inner = self.lock();
                let batch = Self::install_snapshot(&mut inner, env)?;
                Self::notify_shapes(&inner, &batch);
                Ok(())
            }
            Operation::CreateCheckpoint => {
                let mut inner = self.lock();
                inner.checkpoints = env.checkpoint;
                Self::notify_each(&inner, |listener| {
                    listener.on_checkpoint_count(env.checkpoint);
                });
                Ok(())
            }
            Operation::ClearState => {
                let mut inner = self.lock();
                inner.replica.nullify();
                inner.replica.adopt_generation(env.generation);
                inner.undo.clear();
                inner.redo.clear();
                Self::notify_each(&inner, |listener| {
                    listener.on_board_cleared(env.generation);
                });
                Ok(())
            }
            Operation::Create | Operation::Modify | Operation::Delete => {
                if env.requester == self.user {
                    // our own edit echoed back; it already applied locally
                    return Ok(());
                }
                let mut inner = self.lock();
                let local = inner.replica.generation();
                if env.generation != local {
                    return Err(StateError::GenerationMismatch {
                        local,
                        remote: env.generation,
                    }
                    .into());
                }
                let shape = env
                    .single_shape()
                    .ok_or(StateError::MultiShapeUpdate(env.shapes.len()))?;
                if inner.replica.is_tombstoned(&shape.id) {
                    debug!(id = %shape.id, op = env.op.op_name(), "local delete already won, dropping");
                    return Ok(());
                }
                let batch = match env.op {
                    Operation::Create => Self::apply_remote_create(&mut inner, shape.clone())?,
                    Operation::Modify => Self::apply_remote_modify(&mut inner, shape.clone())?,
                    _ => Self::apply_remote_delete(&mut inner, &shape.id)?,
                };
                Self::notify_shapes(&inner, &batch);
                Ok(())
            }
        }
    }

    /// Number of live shapes.
    pub fn shape_count(&self) -> usize {
        self.lock().replica.len()
    }

    /// Copy of the live record for `id`.
    pub fn shape(&self, id: &str) -> Option<BoardShape> {
        self.lock().replica.get(id).cloned()
    }

    /// Current generation.
    pub fn generation(&self) -> Generation {
        self.lock().replica.generation()
    }

    /// Checkpoint count last announced by the hub.
    pub fn checkpoint_count(&self) -> CheckpointId {
        self.lock().checkpoints
    }

    /// Whether `id` is tombstoned locally.
    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.lock().replica.is_tombstoned(id)
    }

    /// Id of the most recently modified live shape.
    pub fn newest_id(&self) -> Option<ShapeId> {
        self.lock().replica.newest().map(|entry| entry.id.clone())
    }

    /// Current undo depth.
    pub fn undo_len(&self) -> usize {
        self.lock().undo.len()
    }

    /// Current redo depth.
    pub fn redo_len(&self) -> usize {
        self.lock().redo.len()
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roll(&self, direction: Direction) -> Result<Vec<UxShape>, ClientError> {
        let mut inner = self.lock();
        loop {
            let entry = match direction {
                Direction::Undo => inner.undo.pop(),
                Direction::Redo => inner.redo.pop(),
            };
            let Some(entry) = entry else {
                return Ok(Vec::new());
            };
            let inverse = entry.transposed();
            let delta = self.rollback(&mut inner, entry)?;
            if delta.is_empty() {
                // the affected shape died under a concurrent remote delete;
                // this entry (and its inverse) are history in both senses
                continue;
            }
            match direction {
                Direction::Undo => inner.redo.push(inverse),
                Direction::Redo => inner.undo.push(inverse),
            }
            Self::notify_shapes(&inner, &delta);
            return Ok(delta);
        }
    }

    // Synthesize the inverse of a history entry, send it to the hub, and
    // apply it locally through the same path remote updates take. An empty
    // delta means the entry no longer applies.
    fn rollback(
        &self,
        inner: &mut BoardInner,
        entry: HistoryEntry,
    ) -> Result<Vec<UxShape>, ClientError> {
        let generation = inner.replica.generation();
        match entry.into_parts() {
            (None, Some(after)) => {
                // inverse of a create: delete it
                let Some(live) = inner.replica.get(&after.id).cloned() else {
                    return Ok(Vec::new());
                };
                let tombstone = live.stamped(Operation::Delete, live.modified_at);
                self.sender.send_update(&UpdateEnvelope::single(
                    tombstone,
                    Operation::Delete,
                    self.user.clone(),
                    generation,
                ))?;
                Ok(Self::apply_remote_delete(inner, &after.id)?)
            }
            (Some(before), None) => {
                // inverse of a delete: bring it back as it was
                if inner.replica.contains(&before.id) {
                    return Ok(Vec::new());
                }
                let revived = before.stamped(Operation::Create, before.modified_at);
                self.sender.send_update(&UpdateEnvelope::single(
                    revived.clone(),
                    Operation::Create,
                    self.user.clone(),
                    generation,
                ))?;
                Ok(Self::apply_remote_create(inner, revived)?)
            }
            (Some(before), Some(after)) => {
                // inverse of a modify: delete the new version, recreate the old
                let Some(live) = inner.replica.get(&after.id).cloned() else {
                    return Ok(Vec::new());
                };
                let tombstone = live.stamped(Operation::Delete, live.modified_at);
                let revived = before.stamped(Operation::Create, before.modified_at);
                self.sender.send_update(&UpdateEnvelope::single(
                    tombstone,
                    Operation::Delete,
                    self.user.clone(),
                    generation,
                ))?;
                self.sender.send_update(&UpdateEnvelope::single(
                    revived.clone(),
                    Operation::Create,
                    self.user.clone(),
                    generation,
                ))?;
                let mut delta = Self::apply_remote_delete(inner, &after.id)?;
                delta.extend(Self::apply_remote_create(inner, revived)?);
                Ok(delta)
            }
            (None, None) => Ok(Vec::new()),
        }
    }

    // Replace the whole replica with a hub snapshot. History from the old
    // epoch is meaningless afterwards, so both stacks are dropped.
    fn install_snapshot(
        inner: &mut BoardInner,
        env: &UpdateEnvelope,
    ) -> Result<Vec<UxShape>, StateError> {
        inner.replica.nullify();
        inner.replica.install(env.shapes.clone())?;
        inner.replica.adopt_generation(env.generation);
        inner.undo.clear();
        inner.redo.clear();
        let batch = env
            .shapes
            .iter()
            .map(|shape| Self::ux(inner, UxOp::Create, shape, env.op))
            .collect();
        Ok(batch)
    }

    // Remote create: withdraw everything newer, place the incoming shape,
    // re-place the withdrawn ones on top.
    fn apply_remote_create(
        inner: &mut BoardInner,
        shape: BoardShape,
    ) -> Result<Vec<UxShape>, StateError> {
        if inner.replica.contains(&shape.id) {
            return Err(StateError::DuplicateId(shape.id));
        }
        let source = Operation::Create;
        let mut batch = Vec::new();
        let later = inner.replica.withdraw_after(shape.modified_at);
        for entry in &later {
            if let Some(withdrawn) = inner.replica.get(&entry.id).cloned() {
                batch.push(Self::ux(inner, UxOp::Delete, &withdrawn, source));
            }
        }

        batch.push(Self::ux(inner, UxOp::Create, &shape, source));
        inner.replica.insert(shape)?;

        for entry in later.into_iter().rev() {
            if let Some(restored) = inner.replica.get(&entry.id).cloned() {
                batch.push(Self::ux(inner, UxOp::Create, &restored, source));
            }
            inner.replica.restore([entry]);
        }
        Ok(batch)
    }

    // Remote modify: like create, but the previous version of the target is
    // withdrawn too. When the target itself sat above the incoming
    // timestamp its withdrawal doubles as the previous-version delete.
    fn apply_remote_modify(
        inner: &mut BoardInner,
        shape: BoardShape,
    ) -> Result<Vec<UxShape>, StateError> {
        if !inner.replica.contains(&shape.id) {
            return Err(StateError::MissingId(shape.id));
        }
        let source = Operation::Modify;
        let mut batch = Vec::new();
        let later = inner.replica.withdraw_after(shape.modified_at);
        let target_withdrawn = later.iter().any(|entry| entry.id == shape.id);
        for entry in &later {
            if let Some(withdrawn) = inner.replica.get(&entry.id).cloned() {
                batch.push(Self::ux(inner, UxOp::Delete, &withdrawn, source));
            }
        }

        if !target_withdrawn {
            if let Some(previous) = inner.replica.get(&shape.id).cloned() {
                batch.push(Self::ux(inner, UxOp::Delete, &previous, source));
            }
        }
        let _previous = inner.replica.replace(shape.clone())?;
        if target_withdrawn {
            // its queue entry was popped above; re-key by inserting fresh
            inner.replica.restore([slate_state::QueueEntry::new(
                shape.id.clone(),
                shape.modified_at,
            )]);
        }
        batch.push(Self::ux(inner, UxOp::Create, &shape, source));

        for entry in later.into_iter().rev() {
            if entry.id == shape.id {
                continue;
            }
            if let Some(restored) = inner.replica.get(&entry.id).cloned() {
                batch.push(Self::ux(inner, UxOp::Create, &restored, source));
            }
            inner.replica.restore([entry]);
        }
        Ok(batch)
    }

    fn apply_remote_delete(
        inner: &mut BoardInner,
        id: &str,
    ) -> Result<Vec<UxShape>, StateError> {
        let removed = inner.replica.remove(id)?;
        Ok(vec![Self::ux(inner, UxOp::Delete, &removed, Operation::Delete)])
    }

    fn ux(inner: &BoardInner, op: UxOp, shape: &BoardShape, source: Operation) -> UxShape {
        UxShape {
            op,
            shape: shape.shape.clone(),
            id: shape.id.clone(),
            checkpoint: inner.checkpoints,
            source,
        }
    }

    fn notify_shapes(inner: &BoardInner, batch: &[UxShape]) {
        if batch.is_empty() {
            return;
        }
        Self::notify_each(inner, |listener| listener.on_shapes(batch));
    }

    // A panicking listener must not starve the others of the update.
    fn notify_each(inner: &BoardInner, deliver: impl Fn(&dyn BoardListener)) {
        for (name, listener) in &inner.listeners {
            if catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref()))).is_err() {
                warn!(listener = %name, "listener panicked during delivery");
            }
        }
    }
}

impl<T: UpdateSender> crate::comm::EnvelopeSink for ClientBoard<T> {
    fn on_envelope(&self, env: &UpdateEnvelope) {
        if let Err(err) = self.on_message(env) {
            match err {
                ClientError::State(StateError::GenerationMismatch { local, remote }) => {
                    warn!(local, remote, "replica out of sync, resubscribe required");
                }
                other => warn!(error = %other, "dropping hub envelope"),
            }
        }
    }
}

/// Sender that drops every envelope. Useful for read-only boards and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSender;

impl UpdateSender for NullSender {
    fn send_update(&self, _env: &UpdateEnvelope) -> Result<(), CommError> {
        Ok(())
    }
}
