//! Editing isolation overlay.
//!
//! While a property is being manipulated locally (a drag, a rotation handle,
//! a color picker) its last confirmed value lives in a *durable shadow* and
//! the shape table holds the *live* value. Incoming ops for a shadowed
//! property only touch the shadow, so remote traffic never yanks a value out
//! from under the user's pointer.
//!
//! ```text
//!            incoming UpdatePosition
//!                     │
//!        shadowed? ───┼─── no ──► live value (shape table)
//!                     │
//!                    yes
//!                     ▼
//!              durable shadow
//! ```
//!
//! The `EditedBy` relation is an adjacency index `shape → {editor}`.

use std::collections::{HashMap, HashSet};

use crate::shape::{ClientId, Color, Property, PropertyValue, Shape, ShapeId, Vec2};

/// Who is holding a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Editor {
    Local,
    Remote(ClientId),
}

/// Durable values of the properties currently under local edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DurableShadow {
    pub position: Option<Vec2>,
    pub rotation: Option<f64>,
    pub scale: Option<Vec2>,
    pub color: Option<Color>,
}

impl DurableShadow {
    pub fn get(&self, property: Property) -> Option<PropertyValue> {
        match property {
            Property::Position => self.position.map(PropertyValue::Position),
            Property::Rotation => self.rotation.map(PropertyValue::Rotation),
            Property::Scale => self.scale.map(PropertyValue::Scale),
            Property::Color => self.color.map(PropertyValue::Color),
        }
    }

    pub fn set(&mut self, value: PropertyValue) {
        match value {
            PropertyValue::Position(p) => self.position = Some(p),
            PropertyValue::Rotation(r) => self.rotation = Some(r),
            PropertyValue::Scale(s) => self.scale = Some(s),
            PropertyValue::Color(c) => self.color = Some(c),
        }
    }

    pub fn take(&mut self, property: Property) -> Option<PropertyValue> {
        match property {
            Property::Position => self.position.take().map(PropertyValue::Position),
            Property::Rotation => self.rotation.take().map(PropertyValue::Rotation),
            Property::Scale => self.scale.take().map(PropertyValue::Scale),
            Property::Color => self.color.take().map(PropertyValue::Color),
        }
    }

    pub fn contains(&self, property: Property) -> bool {
        self.get(property).is_some()
    }

    pub fn properties(&self) -> impl Iterator<Item = Property> + '_ {
        Property::ALL.into_iter().filter(|p| self.contains(*p))
    }

    pub fn is_empty(&self) -> bool {
        self.properties().next().is_none()
    }
}

/// Per-shape durable shadows plus the `EditedBy` index.
#[derive(Debug, Clone, Default)]
pub struct EditingOverlay {
    shadows: HashMap<ShapeId, DurableShadow>,
    edited_by: HashMap<ShapeId, HashSet<Editor>>,
}

impl EditingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin editing `properties` of `shape`.
    ///
    /// Local edits capture the current value of every property that is not
    /// already shadowed. Remote editors only get an `EditedBy` link: remote
    /// values race each other last-writer-wins.
    pub fn start(&mut self, shape: &Shape, properties: &[Property], editor: Editor) {
        if editor == Editor::Local {
            let shadow = self.shadows.entry(shape.id).or_default();
            for &property in properties {
                if !shadow.contains(property) {
                    shadow.set(shape.get(property));
                }
            }
        }
        self.link(shape.id, editor);
    }

    pub fn is_shadowed(&self, id: ShapeId, property: Property) -> bool {
        self.shadows.get(&id).is_some_and(|s| s.contains(property))
    }

    pub fn durable(&self, id: ShapeId, property: Property) -> Option<PropertyValue> {
        self.shadows.get(&id).and_then(|s| s.get(property))
    }

    pub fn shadow(&self, id: ShapeId) -> Option<&DurableShadow> {
        self.shadows.get(&id)
    }

    /// Write `value` into the shadow if that property is shadowed.
    ///
    /// Returns `false` when the property is not under edit and the caller
    /// should update the live value instead.
    pub fn write_durable(&mut self, id: ShapeId, value: PropertyValue) -> bool {
        match self.shadows.get_mut(&id) {
            Some(shadow) if shadow.contains(value.property()) => {
                shadow.set(value);
                true
            }
            _ => false,
        }
    }

    /// Remove the shadows for `properties`, returning the durable values.
    ///
    /// When no shadowed property remains the local `EditedBy` link is
    /// dropped as well.
    pub fn release(&mut self, id: ShapeId, properties: &[Property]) -> Vec<PropertyValue> {
        let Some(shadow) = self.shadows.get_mut(&id) else {
            return Vec::new();
        };
        let released: Vec<PropertyValue> =
            properties.iter().filter_map(|p| shadow.take(*p)).collect();

        if shadow.is_empty() {
            self.shadows.remove(&id);
            self.unlink(id, Editor::Local);
        }
        released
    }

    pub fn link(&mut self, id: ShapeId, editor: Editor) {
        self.edited_by.entry(id).or_default().insert(editor);
    }

    pub fn unlink(&mut self, id: ShapeId, editor: Editor) {
        if let Some(editors) = self.edited_by.get_mut(&id) {
            editors.remove(&editor);
            if editors.is_empty() {
                self.edited_by.remove(&id);
            }
        }
    }

    /// Drop every link held by `editor` (e.g. the peer disconnected).
    pub fn unlink_everywhere(&mut self, editor: Editor) {
        self.edited_by.retain(|_, editors| {
            editors.remove(&editor);
            !editors.is_empty()
        });
    }

    pub fn is_edited_by(&self, id: ShapeId, editor: Editor) -> bool {
        self.edited_by.get(&id).is_some_and(|e| e.contains(&editor))
    }

    pub fn editors(&self, id: ShapeId) -> impl Iterator<Item = Editor> + '_ {
        self.edited_by.get(&id).into_iter().flatten().copied()
    }

    /// Shapes with at least one shadowed property.
    pub fn shadowed_shapes(&self) -> Vec<ShapeId> {
        self.shadows.keys().copied().collect()
    }

    /// Forget everything about a shape (it was deleted).
    pub fn remove_shape(&mut self, id: ShapeId) {
        self.shadows.remove(&id);
        self.edited_by.remove(&id);
    }

    /// Drop overlay state for shapes that no longer satisfy `keep`.
    pub fn retain_shapes(&mut self, mut keep: impl FnMut(ShapeId) -> bool) {
        self.shadows.retain(|id, _| keep(*id));
        self.edited_by.retain(|id, _| keep(*id));
    }

    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty() && self.edited_by.is_empty()
    }
}
