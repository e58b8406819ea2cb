//! Operation model: the closed set of mutations replicated between clients
//! and the authority.
//!
//! Every update carries the value it overwrites (`prev_*`) so that an op can
//! be inverted without consulting document state. `seq` is the authoritative
//! sequence number, [`UNASSIGNED_SEQ`] until the authority accepts the op.

use serde::{Deserialize, Serialize};

use crate::shape::{Color, Property, PropertyValue, Shape, ShapeId, Vec2};

/// Authoritative sequence number.
pub type Seq = u64;

/// Sequence number carried by ops the authority has not accepted yet.
pub const UNASSIGNED_SEQ: Seq = 0;

/// A single replicated mutation.
///
/// JSON form is tagged by variant name with camelCase fields, e.g.
/// `{"type":"UpdatePosition","id":3,"seq":0,"x":1.0,"y":2.0,"prevX":0.0,"prevY":0.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Op {
    /// `id` always equals `shape.id`.
    CreateShape {
        id: ShapeId,
        seq: Seq,
        shape: Shape,
    },
    DeleteShape {
        id: ShapeId,
        seq: Seq,
        shape: Shape,
    },
    UpdatePosition {
        id: ShapeId,
        seq: Seq,
        x: f64,
        y: f64,
        prev_x: f64,
        prev_y: f64,
    },
    UpdateRotation {
        id: ShapeId,
        seq: Seq,
        angle: f64,
        prev_angle: f64,
    },
    UpdateScale {
        id: ShapeId,
        seq: Seq,
        scale_x: f64,
        scale_y: f64,
        prev_scale_x: f64,
        prev_scale_y: f64,
    },
    UpdateColor {
        id: ShapeId,
        seq: Seq,
        color: Color,
        prev_color: Color,
    },
}

impl Op {
    pub fn create(shape: Shape) -> Self {
        Op::CreateShape {
            id: shape.id,
            seq: UNASSIGNED_SEQ,
            shape,
        }
    }

    pub fn delete(shape: Shape) -> Self {
        Op::DeleteShape {
            id: shape.id,
            seq: UNASSIGNED_SEQ,
            shape,
        }
    }

    /// Build the update op that moves `id` from `prev` to `next`.
    ///
    /// Returns `None` when the two values belong to different properties.
    pub fn change(id: ShapeId, prev: PropertyValue, next: PropertyValue) -> Option<Self> {
        let seq = UNASSIGNED_SEQ;
        let op = match (prev, next) {
            (PropertyValue::Position(p), PropertyValue::Position(n)) => Op::UpdatePosition {
                id,
                seq,
                x: n.x,
                y: n.y,
                prev_x: p.x,
                prev_y: p.y,
            },
            (PropertyValue::Rotation(p), PropertyValue::Rotation(n)) => Op::UpdateRotation {
                id,
                seq,
                angle: n,
                prev_angle: p,
            },
            (PropertyValue::Scale(p), PropertyValue::Scale(n)) => Op::UpdateScale {
                id,
                seq,
                scale_x: n.x,
                scale_y: n.y,
                prev_scale_x: p.x,
                prev_scale_y: p.y,
            },
            (PropertyValue::Color(p), PropertyValue::Color(n)) => Op::UpdateColor {
                id,
                seq,
                color: n,
                prev_color: p,
            },
            _ => return None,
        };
        Some(op)
    }

    /// Stable id of the shape this op targets.
    pub fn id(&self) -> ShapeId {
        match self {
            Op::CreateShape { id, .. }
            | Op::DeleteShape { id, .. }
            | Op::UpdatePosition { id, .. }
            | Op::UpdateRotation { id, .. }
            | Op::UpdateScale { id, .. }
            | Op::UpdateColor { id, .. } => *id,
        }
    }

    pub fn seq(&self) -> Seq {
        match self {
            Op::CreateShape { seq, .. }
            | Op::DeleteShape { seq, .. }
            | Op::UpdatePosition { seq, .. }
            | Op::UpdateRotation { seq, .. }
            | Op::UpdateScale { seq, .. }
            | Op::UpdateColor { seq, .. } => *seq,
        }
    }

    pub fn set_seq(&mut self, value: Seq) {
        match self {
            Op::CreateShape { seq, .. }
            | Op::DeleteShape { seq, .. }
            | Op::UpdatePosition { seq, .. }
            | Op::UpdateRotation { seq, .. }
            | Op::UpdateScale { seq, .. }
            | Op::UpdateColor { seq, .. } => *seq = value,
        }
    }

    pub fn with_seq(mut self, seq: Seq) -> Self {
        self.set_seq(seq);
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.seq() != UNASSIGNED_SEQ
    }

    /// Create and delete change shape existence rather than a property.
    pub fn is_structural(&self) -> bool {
        matches!(self, Op::CreateShape { .. } | Op::DeleteShape { .. })
    }

    /// The editable property an update writes, `None` for create/delete.
    pub fn property(&self) -> Option<Property> {
        match self {
            Op::CreateShape { .. } | Op::DeleteShape { .. } => None,
            Op::UpdatePosition { .. } => Some(Property::Position),
            Op::UpdateRotation { .. } => Some(Property::Rotation),
            Op::UpdateScale { .. } => Some(Property::Scale),
            Op::UpdateColor { .. } => Some(Property::Color),
        }
    }

    /// New value written by an update, `None` for create/delete.
    pub fn value(&self) -> Option<PropertyValue> {
        match *self {
            Op::CreateShape { .. } | Op::DeleteShape { .. } => None,
            Op::UpdatePosition { x, y, .. } => Some(PropertyValue::Position(Vec2::new(x, y))),
            Op::UpdateRotation { angle, .. } => Some(PropertyValue::Rotation(angle)),
            Op::UpdateScale { scale_x, scale_y, .. } => {
                Some(PropertyValue::Scale(Vec2::new(scale_x, scale_y)))
            }
            Op::UpdateColor { color, .. } => Some(PropertyValue::Color(color)),
        }
    }

    /// Value an update overwrote when it was authored.
    pub fn prev_value(&self) -> Option<PropertyValue> {
        match *self {
            Op::CreateShape { .. } | Op::DeleteShape { .. } => None,
            Op::UpdatePosition { prev_x, prev_y, .. } => {
                Some(PropertyValue::Position(Vec2::new(prev_x, prev_y)))
            }
            Op::UpdateRotation { prev_angle, .. } => Some(PropertyValue::Rotation(prev_angle)),
            Op::UpdateScale {
                prev_scale_x,
                prev_scale_y,
                ..
            } => Some(PropertyValue::Scale(Vec2::new(prev_scale_x, prev_scale_y))),
            Op::UpdateColor { prev_color, .. } => Some(PropertyValue::Color(prev_color)),
        }
    }

    /// Variant name as it appears on the wire.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Op::CreateShape { .. } => "CreateShape",
            Op::DeleteShape { .. } => "DeleteShape",
            Op::UpdatePosition { .. } => "UpdatePosition",
            Op::UpdateRotation { .. } => "UpdateRotation",
            Op::UpdateScale { .. } => "UpdateScale",
            Op::UpdateColor { .. } => "UpdateColor",
        }
    }

    /// The op that undoes `self`. The result is unassigned.
    ///
    /// `op.invert().invert()` equals `op` in every field except `seq`.
    pub fn invert(&self) -> Op {
        let seq = UNASSIGNED_SEQ;
        match self.clone() {
            Op::CreateShape { id, shape, .. } => Op::DeleteShape { id, seq, shape },
            Op::DeleteShape { id, shape, .. } => Op::CreateShape { id, seq, shape },
            Op::UpdatePosition {
                id,
                x,
                y,
                prev_x,
                prev_y,
                ..
            } => Op::UpdatePosition {
                id,
                seq,
                x: prev_x,
                y: prev_y,
                prev_x: x,
                prev_y: y,
            },
            Op::UpdateRotation {
                id,
                angle,
                prev_angle,
                ..
            } => Op::UpdateRotation {
                id,
                seq,
                angle: prev_angle,
                prev_angle: angle,
            },
            Op::UpdateScale {
                id,
                scale_x,
                scale_y,
                prev_scale_x,
                prev_scale_y,
                ..
            } => Op::UpdateScale {
                id,
                seq,
                scale_x: prev_scale_x,
                scale_y: prev_scale_y,
                prev_scale_x: scale_x,
                prev_scale_y: scale_y,
            },
            Op::UpdateColor {
                id,
                color,
                prev_color,
                ..
            } => Op::UpdateColor {
                id,
                seq,
                color: prev_color,
                prev_color: color,
            },
        }
    }
}
