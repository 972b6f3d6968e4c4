// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Authoritative board state.
//!
//! The hub owns one [`ServerBoard`]. Incoming envelopes either mutate it
//! (`save_update`), read it (`fetch_state`), or move it across epochs
//! (`save_checkpoint` / `fetch_checkpoint`). Intentional drops — a stale
//! generation or a late update to a deleted shape — report `Ok(false)`;
//! protocol violations report an error and leave the state untouched.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::ServerError;
use slate_proto::{
    BoardShape, CheckpointId, Generation, Operation, UpdateEnvelope, UserId,
};
use slate_state::{Replica, StateError};
use tracing::debug;

/// Authoritative replica plus the checkpoint store behind it.
#[derive(Debug)]
pub struct ServerBoard<S> {
    replica: Replica,
    store: S,
}

impl<S: CheckpointStore> ServerBoard<S> {
    /// New board at generation 0 backed by `store`.
    pub fn new(store: S) -> Self {
        Self {
            replica: Replica::new(),
            store,
        }
    }

    /// Current generation.
    pub fn generation(&self) -> Generation {
        self.replica.generation()
    }

    /// Number of live shapes.
    pub fn shape_count(&self) -> usize {
        self.replica.len()
    }

    /// Number of checkpoints saved so far.
    pub fn checkpoint_count(&self) -> CheckpointId {
        self.store.count()
    }

    /// Whether `id` is tombstoned.
    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.replica.is_tombstoned(id)
    }

    /// The live record for `id`.
    pub fn shape(&self, id: &str) -> Option<&BoardShape> {
        self.replica.get(id)
    }

    /// Snapshot of the full board for a (re)subscribing client: shapes in
    /// ascending last-modified order, current checkpoint count and
    /// generation. Never mutates state.
    pub fn fetch_state(&self, requester: impl Into<UserId>) -> UpdateEnvelope {
        UpdateEnvelope {
            shapes: self.replica.ordered_shapes(),
            op: Operation::FetchState,
            requester: requester.into(),
            checkpoint: self.store.count(),
            generation: self.replica.generation(),
        }
    }

    /// Apply a client update. `Ok(true)` means the update took and should
    /// be fanned out; `Ok(false)` means it was deliberately dropped.
    pub fn save_update(&mut self, env: &UpdateEnvelope) -> Result<bool, StateError> {
        match env.op {
            Operation::Create => {
                let Some(shape) = self.admitted(env) else {
                    return Ok(false);
                };
                let shape = shape?.clone();
                self.replica.insert(shape)?;
                Ok(true)
            }
            Operation::Modify => {
                let Some(shape) = self.admitted(env) else {
                    return Ok(false);
                };
                let shape = shape?.clone();
                if self.replica.is_tombstoned(&shape.id) {
                    debug!(id = %shape.id, "dropping late modify of deleted shape");
                    return Ok(false);
                }
                self.replica.replace(shape)?;
                Ok(true)
            }
            Operation::Delete => {
                let Some(shape) = self.admitted(env) else {
                    return Ok(false);
                };
                let id = shape?.id.clone();
                if self.replica.is_tombstoned(&id) {
                    debug!(id = %id, "dropping late delete of deleted shape");
                    return Ok(false);
                }
                self.replica.remove(&id)?;
                Ok(true)
            }
            Operation::ClearState => self.clear_state(env),
            other => Err(StateError::UnexpectedOperation(other)),
        }
    }

    /// Snapshot the current board into a new checkpoint. State is
    /// unchanged; the returned envelope announces the assigned number.
    pub fn save_checkpoint(
        &mut self,
        requester: impl Into<UserId>,
    ) -> Result<UpdateEnvelope, CheckpointError> {
        let snapshot = self.replica.ordered_shapes();
        let number = self.store.save(&snapshot)?;
        debug!(number, shapes = snapshot.len(), "checkpoint saved");
        Ok(UpdateEnvelope {
            shapes: Vec::new(),
            op: Operation::CreateCheckpoint,
            requester: requester.into(),
            checkpoint: number,
            generation: self.replica.generation(),
        })
    }

    /// Restore checkpoint `checkpoint`: every live id is tombstoned, the
    /// snapshot is reinstalled, and the generation becomes the checkpoint
    /// number. The returned envelope carries the restored shapes for
    /// broadcast.
    pub fn fetch_checkpoint(
        &mut self,
        checkpoint: CheckpointId,
        requester: impl Into<UserId>,
    ) -> Result<UpdateEnvelope, ServerError> {
        let snapshot = self.store.fetch(checkpoint)?;
        self.replica.nullify();
        self.replica.install(snapshot)?;
        self.replica.adopt_generation(checkpoint);
        Ok(UpdateEnvelope {
            shapes: self.replica.ordered_shapes(),
            op: Operation::FetchCheckpoint,
            requester: requester.into(),
            checkpoint: self.store.count(),
            generation: checkpoint,
        })
    }

    // Generation gate + arity check shared by the data operations.
    // None = stale generation (drop), Some(Err) = malformed envelope.
    fn admitted<'a>(
        &self,
        env: &'a UpdateEnvelope,
    ) -> Option<Result<&'a BoardShape, StateError>> {
        let local = self.replica.generation();
        if env.generation != local {
            debug!(
                local,
                remote = env.generation,
                op = env.op.op_name(),
                "dropping update from a stale generation"
            );
            return None;
        }
        Some(
            env.single_shape()
                .ok_or(StateError::MultiShapeUpdate(env.shapes.len())),
        )
    }

    fn clear_state(&mut self, env: &UpdateEnvelope) -> Result<bool, StateError> {
        let local = self.replica.generation();
        if env.generation <= local {
            debug!(
                local,
                announced = env.generation,
                "dropping stale clear"
            );
            return Ok(false);
        }
        self.replica.nullify();
        self.replica.adopt_generation(env.generation);
        debug!(generation = env.generation, "board cleared");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use slate_proto::{Point, Shape, ShapeKind, UserLevel};

    fn board() -> ServerBoard<MemoryCheckpointStore> {
        ServerBoard::new(MemoryCheckpointStore::new())
    }

    fn shape(id: &str, at: u64) -> BoardShape {
        let geometry =
            Shape::from_corners(ShapeKind::Ellipse, Point::default(), Point { x: 3.0, y: 3.0 });
        BoardShape::new(geometry, id, "alice", UserLevel::Low, at)
    }

    fn create(id: &str, at: u64, generation: Generation) -> UpdateEnvelope {
        UpdateEnvelope::single(shape(id, at), Operation::Create, "alice", generation)
    }

    fn delete(id: &str, at: u64, generation: Generation) -> UpdateEnvelope {
        UpdateEnvelope::single(
            shape(id, at).stamped(Operation::Delete, at),
            Operation::Delete,
            "alice",
            generation,
        )
    }

    #[test]
    fn create_then_fetch_state_orders_by_modified_time() {
        let mut board = board();
        assert!(board.save_update(&create("s2", 9, 0)).unwrap());
        assert!(board.save_update(&create("s1", 4, 0)).unwrap());

        let env = board.fetch_state("bob");
        assert_eq!(env.op, Operation::FetchState);
        assert_eq!(env.generation, 0);
        assert_eq!(env.checkpoint, 0);
        let order: Vec<&str> = env.shapes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["s1", "s2"]);
    }

    #[test]
    fn duplicate_create_is_a_protocol_violation() {
        let mut board = board();
        assert!(board.save_update(&create("s1", 4, 0)).unwrap());
        assert_eq!(
            board.save_update(&create("s1", 5, 0)),
            Err(StateError::DuplicateId("s1".to_owned()))
        );
        assert_eq!(board.shape_count(), 1);
    }

    #[test]
    fn stale_generation_updates_are_dropped() {
        let mut board = board();
        let cleared = UpdateEnvelope::request(Operation::ClearState, "admin", 0, 1);
        assert!(board.save_update(&cleared).unwrap());
        assert_eq!(board.generation(), 1);

        // an in-flight create issued before the clear
        assert!(!board.save_update(&create("s1", 4, 0)).unwrap());
        assert_eq!(board.shape_count(), 0);
    }

    #[test]
    fn modify_and_delete_of_tombstoned_ids_are_dropped() {
        let mut board = board();
        assert!(board.save_update(&create("s1", 4, 0)).unwrap());
        assert!(board.save_update(&delete("s1", 5, 0)).unwrap());
        assert!(board.is_tombstoned("s1"));

        let late_modify = UpdateEnvelope::single(
            shape("s1", 6).stamped(Operation::Modify, 6),
            Operation::Modify,
            "bob",
            0,
        );
        assert!(!board.save_update(&late_modify).unwrap());
        assert!(!board.save_update(&delete("s1", 7, 0)).unwrap());
    }

    #[test]
    fn modify_of_unknown_id_is_a_protocol_violation() {
        let mut board = board();
        let env = UpdateEnvelope::single(
            shape("ghost", 6).stamped(Operation::Modify, 6),
            Operation::Modify,
            "bob",
            0,
        );
        assert!(matches!(
            board.save_update(&env),
            Err(StateError::MissingId(_))
        ));
    }

    #[test]
    fn multi_shape_updates_are_rejected() {
        let mut board = board();
        let mut env = create("s1", 4, 0);
        env.shapes.push(shape("s2", 5));
        assert_eq!(
            board.save_update(&env),
            Err(StateError::MultiShapeUpdate(2))
        );
    }

    #[test]
    fn fetch_and_checkpoint_ops_are_not_updates() {
        let mut board = board();
        let env = UpdateEnvelope::request(Operation::FetchState, "bob", 0, 0);
        assert_eq!(
            board.save_update(&env),
            Err(StateError::UnexpectedOperation(Operation::FetchState))
        );
    }

    #[test]
    fn clear_state_adopts_announced_generation_and_tombstones_all() {
        let mut board = board();
        assert!(board.save_update(&create("s1", 4, 0)).unwrap());
        assert!(board.save_update(&create("s2", 6, 0)).unwrap());

        let cleared = UpdateEnvelope::request(Operation::ClearState, "admin", 0, 1);
        assert!(board.save_update(&cleared).unwrap());
        assert_eq!(board.generation(), 1);
        assert_eq!(board.shape_count(), 0);
        assert!(board.is_tombstoned("s1"));
        assert!(board.is_tombstoned("s2"));

        // replaying the same clear is a no-op
        assert!(!board.save_update(&cleared).unwrap());
    }

    #[test]
    fn checkpoint_save_restore_cycle() {
        let mut board = board();
        assert!(board.save_update(&create("s1", 4, 0)).unwrap());
        assert!(board.save_update(&create("s2", 6, 0)).unwrap());

        let saved = board.save_checkpoint("admin").unwrap();
        assert_eq!(saved.op, Operation::CreateCheckpoint);
        assert_eq!(saved.checkpoint, 1);
        assert!(saved.shapes.is_empty());
        assert_eq!(board.shape_count(), 2);

        // diverge, then restore
        assert!(board.save_update(&delete("s2", 8, 0)).unwrap());
        assert!(board.save_update(&create("s3", 9, 0)).unwrap());

        let restored = board.fetch_checkpoint(1, "admin").unwrap();
        assert_eq!(restored.op, Operation::FetchCheckpoint);
        assert_eq!(restored.generation, 1);
        assert_eq!(board.generation(), 1);
        let order: Vec<&str> = restored.shapes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["s1", "s2"]);
        assert!(board.is_tombstoned("s3"));
        assert!(!board.is_tombstoned("s2"));
    }

    #[test]
    fn fetch_of_unknown_checkpoint_leaves_state_alone() {
        let mut board = board();
        assert!(board.save_update(&create("s1", 4, 0)).unwrap());
        assert!(board.fetch_checkpoint(9, "admin").is_err());
        assert_eq!(board.shape_count(), 1);
        assert_eq!(board.generation(), 0);
    }
}
