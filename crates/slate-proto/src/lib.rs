// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for the Slate whiteboard hub (shapes, update envelopes,
//! UX deltas). Envelopes are transported as length-prefixed CBOR packets
//! (see [`wire`]).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique shape identifier, assigned by the originating client.
pub type ShapeId = String;
/// Participant identifier.
pub type UserId = String;
/// Last-modified timestamp in milliseconds, assigned by the originating
/// client and carried unchanged on the wire.
pub type Timestamp = u64;
/// Checkpoint generation. Advances only on a global clear or a checkpoint
/// restore; identifies the current epoch of board state.
pub type Generation = u64;
/// Checkpoint number, assigned monotonically by the hub starting at 1.
pub type CheckpointId = u64;

/// Number of shapes carried by a Create/Modify/Delete envelope.
pub const SINGLE_UPDATE_SIZE: usize = 1;
/// Generation a fresh board starts in.
pub const INITIAL_CHECKPOINT_STATE: Generation = 0;
/// Capacity of the client undo and redo stacks.
pub const UNDO_REDO_STACK_SIZE: usize = 7;
/// Module identifier this protocol is addressed under on the message bus.
pub const MODULE_ID: &str = "whiteboard";

/// Default Unix socket path for the whiteboard hub.
///
/// Prefers a per-user runtime dir (XDG_RUNTIME_DIR) and falls back to `/tmp`
/// when unavailable.
pub fn default_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(format!("slate-{MODULE_ID}.sock"))
}

/// RGBA color. Alpha 255 is fully opaque.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha channel.
    pub a: u8,
}

impl Color {
    /// Opaque black, the default stroke color.
    pub const BLACK: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// A point in board coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// Geometric shape classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShapeKind {
    /// Axis-aligned rectangle (two corner points).
    Rectangle,
    /// Ellipse inscribed in the bounding box of two corner points.
    Ellipse,
    /// Straight line segment (two endpoints).
    Line,
    /// Open polyline (two or more vertices).
    Polyline,
}

/// Semantic shape record. Pure value type; every copy that enters a
/// history structure or a checkpoint snapshot is independent of the live
/// record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shape {
    /// Shape classification.
    pub kind: ShapeKind,
    /// Geometry vertices; interpretation depends on `kind`.
    pub points: Vec<Point>,
    /// Stroke width in board units.
    pub stroke_width: f32,
    /// Stroke color.
    pub stroke_color: Color,
    /// Fill color, if any.
    pub fill_color: Option<Color>,
    /// Rotation about the shape center, radians.
    pub rotation: f32,
}

impl Shape {
    /// Shape spanning two corner points with default styling.
    pub fn from_corners(kind: ShapeKind, a: Point, b: Point) -> Self {
        Self {
            kind,
            points: vec![a, b],
            stroke_width: 1.0,
            stroke_color: Color::BLACK,
            fill_color: None,
            rotation: 0.0,
        }
    }
}

/// Permission level of a participant. Only High may issue a global clear.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserLevel {
    /// Regular participant.
    Low,
    /// Privileged participant.
    High,
}

impl UserLevel {
    /// Whether this level may issue a global board clear.
    pub fn may_clear(self) -> bool {
        matches!(self, Self::High)
    }
}

/// Operation flags carried by update envelopes (wire-stable).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operation {
    /// Insert a new shape.
    Create,
    /// Replace an existing shape.
    Modify,
    /// Remove an existing shape.
    Delete,
    /// Request / deliver the full ordered board state.
    FetchState,
    /// Request / deliver a numbered checkpoint snapshot.
    FetchCheckpoint,
    /// Snapshot the current board into a new checkpoint.
    CreateCheckpoint,
    /// Clear the board globally and open a new generation.
    ClearState,
}

impl Operation {
    /// Canonical op string for this flag.
    pub fn op_name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
            Self::FetchState => "fetch_state",
            Self::FetchCheckpoint => "fetch_checkpoint",
            Self::CreateCheckpoint => "create_checkpoint",
            Self::ClearState => "clear_state",
        }
    }

    /// True for the single-shape data operations (Create/Modify/Delete).
    pub fn is_data_op(self) -> bool {
        matches!(self, Self::Create | Self::Modify | Self::Delete)
    }
}

/// A shape plus its replication metadata. Identity is `id`; the inner
/// [`Shape`] carries no identity of its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardShape {
    /// Semantic shape record.
    pub shape: Shape,
    /// Unique shape identifier.
    pub id: ShapeId,
    /// Participant that created the shape.
    pub creator: UserId,
    /// Permission level of the creator.
    pub level: UserLevel,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last-modified time. Keys the render-order queue.
    pub modified_at: Timestamp,
    /// Most recent operation applied to this shape.
    pub op: Operation,
}

impl BoardShape {
    /// New shape record stamped as a Create at time `at`.
    pub fn new(
        shape: Shape,
        id: impl Into<ShapeId>,
        creator: impl Into<UserId>,
        level: UserLevel,
        at: Timestamp,
    ) -> Self {
        Self {
            shape,
            id: id.into(),
            creator: creator.into(),
            level,
            created_at: at,
            modified_at: at,
            op: Operation::Create,
        }
    }

    /// Copy of this record re-stamped with `op` at time `at`.
    pub fn stamped(&self, op: Operation, at: Timestamp) -> Self {
        let mut next = self.clone();
        next.op = op;
        next.modified_at = at;
        next
    }
}

/// Update envelope exchanged between clients and the hub.
///
/// Data operations (Create/Modify/Delete) carry exactly one shape and the
/// sender's current generation; state operations carry the fields noted on
/// each [`Operation`] variant. Unknown fields are ignored on decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateEnvelope {
    /// Shapes carried by this update (empty for pure requests).
    pub shapes: Vec<BoardShape>,
    /// Operation flag.
    pub op: Operation,
    /// Participant that issued the operation.
    pub requester: UserId,
    /// Checkpoint number (requests name the snapshot to fetch; replies
    /// carry the current count or the assigned number).
    #[serde(default)]
    pub checkpoint: CheckpointId,
    /// Sender's current generation, or the post-clear generation for
    /// ClearState.
    #[serde(default)]
    pub generation: Generation,
}

impl UpdateEnvelope {
    /// Single-shape data envelope.
    pub fn single(
        shape: BoardShape,
        op: Operation,
        requester: impl Into<UserId>,
        generation: Generation,
    ) -> Self {
        Self {
            shapes: vec![shape],
            op,
            requester: requester.into(),
            checkpoint: 0,
            generation,
        }
    }

    /// Shape-less request envelope.
    pub fn request(
        op: Operation,
        requester: impl Into<UserId>,
        checkpoint: CheckpointId,
        generation: Generation,
    ) -> Self {
        Self {
            shapes: Vec::new(),
            op,
            requester: requester.into(),
            checkpoint,
            generation,
        }
    }

    /// The carried shape when this is a well-formed single-shape update.
    pub fn single_shape(&self) -> Option<&BoardShape> {
        if self.shapes.len() == SINGLE_UPDATE_SIZE {
            self.shapes.first()
        } else {
            None
        }
    }
}

/// Render-side delta verb.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UxOp {
    /// Place the shape on top of the current z-order.
    Create,
    /// Withdraw the shape from the view.
    Delete,
}

/// Render-side delta record handed to registered listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UxShape {
    /// Delta verb.
    pub op: UxOp,
    /// Shape geometry to place or withdraw.
    pub shape: Shape,
    /// Shape identity.
    pub id: ShapeId,
    /// Checkpoint count visible to the client at emission time.
    pub checkpoint: CheckpointId,
    /// Operation that caused this delta.
    pub source: Operation,
}

pub mod wire;
