// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operation demultiplexer for the hub.
//!
//! Each decoded envelope goes through [`BoardRouter::dispatch`], which
//! applies it to the board and answers with the fan-out plan: who receives
//! which envelope. The transport layer performs the actual sends, so the
//! router stays synchronous and directly testable.

use crate::checkpoint::CheckpointStore;
use crate::state::ServerBoard;
use crate::ServerError;
use slate_proto::{Operation, UpdateEnvelope};
use tracing::debug;

/// Who an outbound envelope goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Only the connection the request arrived on.
    Requester,
    /// Every connected client, the requester included.
    Everyone,
}

/// One envelope the transport should deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Delivery scope.
    pub target: RouteTarget,
    /// Envelope to send.
    pub envelope: UpdateEnvelope,
}

/// Demultiplexes operation flags onto a [`ServerBoard`].
#[derive(Debug)]
pub struct BoardRouter<S> {
    board: ServerBoard<S>,
}

impl<S: CheckpointStore> BoardRouter<S> {
    /// Router over a fresh board backed by `store`.
    pub fn new(store: S) -> Self {
        Self {
            board: ServerBoard::new(store),
        }
    }

    /// Read access to the board, mostly for inspection and tests.
    pub fn board(&self) -> &ServerBoard<S> {
        &self.board
    }

    /// Apply one inbound envelope and return the fan-out plan. `None`
    /// means the envelope was deliberately dropped and nothing goes out.
    pub fn dispatch(&mut self, env: UpdateEnvelope) -> Result<Option<Outbound>, ServerError> {
        match env.op {
            Operation::FetchState => Ok(Some(Outbound {
                target: RouteTarget::Requester,
                envelope: self.board.fetch_state(env.requester),
            })),
            Operation::CreateCheckpoint => Ok(Some(Outbound {
                target: RouteTarget::Everyone,
                envelope: self.board.save_checkpoint(env.requester)?,
            })),
            Operation::FetchCheckpoint => Ok(Some(Outbound {
                target: RouteTarget::Everyone,
                envelope: self.board.fetch_checkpoint(env.checkpoint, env.requester)?,
            })),
            Operation::Create | Operation::Modify | Operation::Delete | Operation::ClearState => {
                if self.board.save_update(&env)? {
                    Ok(Some(Outbound {
                        target: RouteTarget::Everyone,
                        envelope: env,
                    }))
                } else {
                    debug!(op = env.op.op_name(), "update dropped, no fan-out");
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use slate_proto::{BoardShape, Point, Shape, ShapeKind, UserLevel};

    fn router() -> BoardRouter<MemoryCheckpointStore> {
        BoardRouter::new(MemoryCheckpointStore::new())
    }

    fn create(id: &str, at: u64) -> UpdateEnvelope {
        let geometry =
            Shape::from_corners(ShapeKind::Line, Point::default(), Point { x: 1.0, y: 0.0 });
        UpdateEnvelope::single(
            BoardShape::new(geometry, id, "alice", UserLevel::Low, at),
            Operation::Create,
            "alice",
            0,
        )
    }

    #[test]
    fn data_ops_broadcast_the_original_envelope() {
        let mut router = router();
        let env = create("s1", 5);
        let out = router.dispatch(env.clone()).unwrap().unwrap();
        assert_eq!(out.target, RouteTarget::Everyone);
        assert_eq!(out.envelope, env);
    }

    #[test]
    fn dropped_updates_produce_no_fan_out() {
        let mut router = router();
        router.dispatch(create("s1", 5)).unwrap();

        let mut stale = create("s2", 6);
        stale.generation = 7;
        assert!(router.dispatch(stale).unwrap().is_none());
    }

    #[test]
    fn fetch_state_goes_back_to_the_requester_only() {
        let mut router = router();
        router.dispatch(create("s1", 5)).unwrap();

        let req = UpdateEnvelope::request(Operation::FetchState, "bob", 0, 0);
        let out = router.dispatch(req).unwrap().unwrap();
        assert_eq!(out.target, RouteTarget::Requester);
        assert_eq!(out.envelope.op, Operation::FetchState);
        assert_eq!(out.envelope.requester, "bob");
        assert_eq!(out.envelope.shapes.len(), 1);
    }

    #[test]
    fn checkpoint_ops_broadcast_to_everyone() {
        let mut router = router();
        router.dispatch(create("s1", 5)).unwrap();

        let saved = router
            .dispatch(UpdateEnvelope::request(
                Operation::CreateCheckpoint,
                "admin",
                0,
                0,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(saved.target, RouteTarget::Everyone);
        assert_eq!(saved.envelope.checkpoint, 1);

        let restored = router
            .dispatch(UpdateEnvelope::request(
                Operation::FetchCheckpoint,
                "admin",
                1,
                0,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(restored.target, RouteTarget::Everyone);
        assert_eq!(restored.envelope.generation, 1);
        assert_eq!(restored.envelope.shapes.len(), 1);
    }

    #[test]
    fn protocol_violations_surface_as_errors() {
        let mut router = router();
        router.dispatch(create("s1", 5)).unwrap();
        assert!(router.dispatch(create("s1", 6)).is_err());
    }
}
