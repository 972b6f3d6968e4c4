// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The replicated board state shared by client and hub.
//!
//! A replica holds the live shape map, the render-order queue, the
//! tombstone set for recently deleted ids, and the current generation.
//! At every quiescent point the shape map and the queue cover exactly the
//! same ids, the queue keys equal each shape's last-modified time, and no
//! tombstoned id is live.

use crate::queue::{QueueEntry, TimestampQueue};
use crate::StateError;
use rustc_hash::{FxHashMap, FxHashSet};
use slate_proto::{BoardShape, Generation, ShapeId, Timestamp};

/// One side's copy of the board.
#[derive(Debug, Default)]
pub struct Replica {
    shapes: FxHashMap<ShapeId, BoardShape>,
    queue: TimestampQueue,
    tombstones: FxHashSet<ShapeId>,
    generation: Generation,
}

impl Replica {
    /// Fresh, empty replica at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Adopt a generation announced by the authority.
    pub fn adopt_generation(&mut self, generation: Generation) {
        self.generation = generation;
    }

    /// Number of live shapes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Whether the board is empty.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &str) -> bool {
        self.shapes.contains_key(id)
    }

    /// Whether `id` was recently deleted and not yet superseded.
    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    /// The live record for `id`.
    pub fn get(&self, id: &str) -> Option<&BoardShape> {
        self.shapes.get(id)
    }

    /// Id and timestamp of the most recently modified shape.
    pub fn newest(&self) -> Option<&QueueEntry> {
        self.queue.peek()
    }

    /// Number of tombstoned ids.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Insert a brand-new shape. Clears any tombstone for the id, so a
    /// re-create after delete round-trips cleanly.
    pub fn insert(&mut self, shape: BoardShape) -> Result<(), StateError> {
        if self.shapes.contains_key(&shape.id) || self.queue.contains(&shape.id) {
            return Err(StateError::DuplicateId(shape.id));
        }
        self.tombstones.remove(&shape.id);
        self.queue
            .insert(QueueEntry::new(shape.id.clone(), shape.modified_at));
        self.shapes.insert(shape.id.clone(), shape);
        Ok(())
    }

    /// Replace an existing shape, re-keying the queue to the new
    /// last-modified time. Returns the previous record.
    pub fn replace(&mut self, shape: BoardShape) -> Result<BoardShape, StateError> {
        let Some(slot) = self.shapes.get_mut(&shape.id) else {
            return Err(StateError::MissingId(shape.id));
        };
        self.queue.bump(&shape.id, shape.modified_at);
        Ok(std::mem::replace(slot, shape))
    }

    /// Remove a live shape, tombstoning its id. Returns the removed record.
    pub fn remove(&mut self, id: &str) -> Result<BoardShape, StateError> {
        let Some(shape) = self.shapes.remove(id) else {
            return Err(StateError::MissingId(id.to_owned()));
        };
        self.queue.remove(id);
        self.tombstones.insert(shape.id.clone());
        Ok(shape)
    }

    /// Treat every live id as now-deleted: move all ids into the tombstone
    /// set and clear the shape map and queue. The generation is untouched;
    /// callers adopt the announced one separately.
    pub fn nullify(&mut self) {
        for id in self.shapes.keys() {
            self.tombstones.insert(id.clone());
        }
        self.shapes.clear();
        self.queue.clear();
    }

    /// Install a snapshot into an empty (nullified) replica. Installed ids
    /// lose their tombstones.
    pub fn install(&mut self, shapes: Vec<BoardShape>) -> Result<(), StateError> {
        for shape in shapes {
            self.insert(shape)?;
        }
        Ok(())
    }

    /// Withdraw every queue entry strictly newer than `cutoff`, newest
    /// first. Shape records stay live; only render order is vacated.
    pub fn withdraw_after(&mut self, cutoff: Timestamp) -> Vec<QueueEntry> {
        let mut later = Vec::new();
        while self.queue.peek().is_some_and(|top| top.timestamp > cutoff) {
            if let Some(entry) = self.queue.pop() {
                later.push(entry);
            }
        }
        later
    }

    /// Put entries withdrawn by [`withdraw_after`](Self::withdraw_after)
    /// back into the queue.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = QueueEntry>) {
        for entry in entries {
            self.queue.insert(entry);
        }
    }

    /// All live shapes ordered by ascending last-modified time (ties on
    /// id), i.e. bottom of the z-order first.
    pub fn ordered_shapes(&self) -> Vec<BoardShape> {
        let mut shapes: Vec<BoardShape> = self.shapes.values().cloned().collect();
        shapes.sort_by(|a, b| {
            (a.modified_at, a.id.as_str()).cmp(&(b.modified_at, b.id.as_str()))
        });
        shapes
    }

    /// Live ids in unspecified order.
    pub fn ids(&self) -> impl Iterator<Item = &ShapeId> {
        self.shapes.keys()
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &TimestampQueue {
        &self.queue
    }
}
