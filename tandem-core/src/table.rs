//! Shape table, op application and checkpoints.
//!
//! `ShapeTable::apply` is the single place where an [`Op`] mutates shape
//! state. The authority, the replica's rebase and the local optimistic path
//! all go through it, so validation is identical everywhere:
//!
//! | Op            | Precondition         |
//! |---------------|----------------------|
//! | CreateShape   | id must not exist    |
//! | everything else | id must exist      |
//!
//! Create and delete must also name the same id as their shape record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::op::{Op, Seq};
use crate::shape::{PropertyValue, Shape, ShapeId};

/// Why an op could not be applied. `Display` is the reason sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("shape {0} already exists")]
    AlreadyExists(ShapeId),
    #[error("shape {0} does not exist")]
    NotFound(ShapeId),
    #[error("op id {0} does not match shape id {1}")]
    IdMismatch(ShapeId, ShapeId),
}

/// Read access to current shape state.
///
/// Implemented by the raw table and by the client document, whose lookups
/// return live (possibly mid-edit) values.
pub trait ShapeLookup {
    fn shape(&self, id: ShapeId) -> Option<&Shape>;

    fn contains(&self, id: ShapeId) -> bool {
        self.shape(id).is_some()
    }
}

/// Shapes keyed by stable id. Ordered so snapshots encode deterministically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeTable {
    shapes: BTreeMap<ShapeId, Shape>,
}

impl ShapeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `op` against the table and apply it.
    pub fn apply(&mut self, op: &Op) -> Result<(), ApplyError> {
        let id = op.id();
        match op {
            Op::CreateShape { shape, .. } | Op::DeleteShape { shape, .. } if shape.id != id => {
                return Err(ApplyError::IdMismatch(id, shape.id));
            }
            Op::CreateShape { shape, .. } => {
                if self.shapes.contains_key(&id) {
                    return Err(ApplyError::AlreadyExists(id));
                }
                self.shapes.insert(id, shape.clone());
            }
            Op::DeleteShape { .. } => {
                self.shapes.remove(&id).ok_or(ApplyError::NotFound(id))?;
            }
            Op::UpdatePosition { .. }
            | Op::UpdateRotation { .. }
            | Op::UpdateScale { .. }
            | Op::UpdateColor { .. } => {
                let shape = self.shapes.get_mut(&id).ok_or(ApplyError::NotFound(id))?;
                if let Some(value) = op.value() {
                    shape.set(value);
                }
            }
        }
        Ok(())
    }

    /// Apply ops in order, skipping (and logging) the ones that fail.
    ///
    /// Returns how many were skipped.
    pub fn apply_all<'a>(&mut self, ops: impl IntoIterator<Item = &'a Op>) -> usize {
        let mut skipped = 0;
        for op in ops {
            if let Err(e) = self.apply(op) {
                log::trace!("Skipping {} on replay: {e}", op.kind_name());
                skipped += 1;
            }
        }
        skipped
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    pub fn get_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        self.shapes.get_mut(&id)
    }

    /// Overwrite a property of an existing shape without going through an op.
    pub fn set_property(&mut self, id: ShapeId, value: PropertyValue) -> Result<(), ApplyError> {
        let shape = self.shapes.get_mut(&id).ok_or(ApplyError::NotFound(id))?;
        shape.set(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ShapeId> + '_ {
        self.shapes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.values()
    }
}

impl ShapeLookup for ShapeTable {
    fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }
}

impl FromIterator<Shape> for ShapeTable {
    fn from_iter<I: IntoIterator<Item = Shape>>(iter: I) -> Self {
        Self {
            shapes: iter.into_iter().map(|s| (s.id, s)).collect(),
        }
    }
}

/// Full snapshot of durable state as of `seq`.
///
/// Applying the checkpoint and then every op with a greater sequence number,
/// in order, reproduces authoritative state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub seq: Seq,
    pub shapes: Vec<Shape>,
}

impl Checkpoint {
    /// Snapshot `table` as of `seq`.
    pub fn capture(seq: Seq, table: &ShapeTable) -> Self {
        Self {
            seq,
            shapes: table.iter().cloned().collect(),
        }
    }

    /// Fresh table holding exactly the checkpointed shapes.
    pub fn restore(&self) -> ShapeTable {
        self.shapes.iter().cloned().collect()
    }
}
