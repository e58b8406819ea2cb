//! Client-side document: live shape table plus the editing overlay.
//!
//! The document is what the UI renders. Its shape table holds *live* values;
//! properties under a local edit keep their durable value in the overlay.

use std::mem;

use crate::editing::{Editor, EditingOverlay};
use crate::op::Op;
use crate::shape::{Property, PropertyValue, Shape, ShapeId};
use crate::table::{ApplyError, ShapeLookup, ShapeTable};

#[derive(Debug, Clone, Default)]
pub struct Document {
    shapes: ShapeTable,
    overlay: EditingOverlay,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an op, routing writes to shadowed properties into the overlay.
    pub fn apply(&mut self, op: &Op) -> Result<(), ApplyError> {
        let id = op.id();
        if let Some(value) = op.value() {
            if self.overlay.is_shadowed(id, value.property()) {
                // Shadowed implies the shape exists; live stays untouched.
                self.overlay.write_durable(id, value);
                return Ok(());
            }
        }

        self.shapes.apply(op)?;
        if let Op::DeleteShape { .. } = op {
            self.overlay.remove_shape(id);
        }
        Ok(())
    }

    /// Replace shape state with a freshly rebuilt table.
    ///
    /// For every locally shadowed property the rebuilt value becomes the new
    /// durable value and the previous live value is carried over. Overlay
    /// state for shapes missing from `fresh` is dropped.
    pub fn rebuild(&mut self, fresh: ShapeTable) {
        let previous = mem::replace(&mut self.shapes, fresh);

        for id in self.overlay.shadowed_shapes() {
            let Some(shape) = self.shapes.get_mut(id) else {
                log::debug!("Shape {id} disappeared while being edited");
                self.overlay.remove_shape(id);
                continue;
            };
            let properties: Vec<Property> = self
                .overlay
                .shadow(id)
                .map(|s| s.properties().collect())
                .unwrap_or_default();

            for property in properties {
                self.overlay.write_durable(id, shape.get(property));
                if let Some(live) = previous.get(id) {
                    shape.set(live.get(property));
                }
            }
        }

        let shapes = &self.shapes;
        self.overlay.retain_shapes(|id| shapes.contains(id));
    }

    /// Start an edit on `properties` of shape `id`.
    pub fn start_editing(
        &mut self,
        id: ShapeId,
        properties: &[Property],
        editor: Editor,
    ) -> Result<(), ApplyError> {
        let shape = self.shapes.get(id).ok_or(ApplyError::NotFound(id))?;
        self.overlay.start(shape, properties, editor);
        Ok(())
    }

    /// Set a live value without producing an op (pointer drag etc.).
    pub fn set_live(&mut self, id: ShapeId, value: PropertyValue) -> Result<(), ApplyError> {
        self.shapes.set_property(id, value)
    }

    /// Finish an edit: one op per property whose live value moved away from
    /// its durable value. The ops carry the durable value as `prev`.
    pub fn commit_editing(&mut self, id: ShapeId, properties: &[Property]) -> Vec<Op> {
        let durable = self.overlay.release(id, properties);
        let Some(shape) = self.shapes.get(id) else {
            return Vec::new();
        };

        durable
            .into_iter()
            .filter_map(|prev| {
                let live = shape.get(prev.property());
                if live == prev {
                    None
                } else {
                    Op::change(id, prev, live)
                }
            })
            .collect()
    }

    /// Abandon an edit, restoring live values from the durable shadows.
    pub fn cancel_editing(&mut self, id: ShapeId, properties: &[Property]) {
        for durable in self.overlay.release(id, properties) {
            if let Err(e) = self.shapes.set_property(id, durable) {
                log::debug!("Cannot restore durable value: {e}");
            }
        }
    }

    /// Durable value of a property: the shadow when editing, else live.
    pub fn durable_value(&self, id: ShapeId, property: Property) -> Option<PropertyValue> {
        self.overlay
            .durable(id, property)
            .or_else(|| self.shapes.get(id).map(|s| s.get(property)))
    }

    /// The shape as last confirmed, with every shadowed property swapped in.
    pub fn durable_shape(&self, id: ShapeId) -> Option<Shape> {
        let mut shape = self.shapes.get(id)?.clone();
        if let Some(shadow) = self.overlay.shadow(id) {
            for property in shadow.properties() {
                if let Some(value) = shadow.get(property) {
                    shape.set(value);
                }
            }
        }
        Some(shape)
    }

    pub fn link_editor(&mut self, id: ShapeId, editor: Editor) {
        if self.shapes.contains(id) {
            self.overlay.link(id, editor);
        }
    }

    pub fn unlink_editor(&mut self, id: ShapeId, editor: Editor) {
        self.overlay.unlink(id, editor);
    }

    pub fn unlink_editor_everywhere(&mut self, editor: Editor) {
        self.overlay.unlink_everywhere(editor);
    }

    pub fn shapes(&self) -> &ShapeTable {
        &self.shapes
    }

    pub fn overlay(&self) -> &EditingOverlay {
        &self.overlay
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

impl ShapeLookup for Document {
    fn shape(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Color, ShapeKind, Vec2};

    fn doc_with_rect(x: f64, y: f64) -> Document {
        let mut doc = Document::new();
        doc.apply(&Op::create(Shape::new(1, ShapeKind::Rect, Vec2::new(x, y), Color::BLACK)))
            .unwrap();
        doc
    }

    fn remote_move(x: f64, y: f64, prev: Vec2) -> Op {
        Op::change(1, PropertyValue::Position(prev), PropertyValue::Position(Vec2::new(x, y)))
            .unwrap()
            .with_seq(2)
    }

    fn position(doc: &Document) -> Vec2 {
        doc.shape(1).unwrap().position()
    }

    #[test]
    fn test_remote_update_lands_in_shadow() {
        let mut doc = doc_with_rect(100.0, 200.0);
        doc.start_editing(1, &[Property::Position], Editor::Local).unwrap();
        doc.set_live(1, PropertyValue::Position(Vec2::new(150.0, 250.0))).unwrap();

        doc.apply(&remote_move(500.0, 600.0, Vec2::new(100.0, 200.0))).unwrap();

        assert_eq!(position(&doc), Vec2::new(150.0, 250.0));
        assert_eq!(
            doc.durable_value(1, Property::Position),
            Some(PropertyValue::Position(Vec2::new(500.0, 600.0)))
        );
    }

    #[test]
    fn test_cancel_after_remote_update_restores_remote_value() {
        let mut doc = doc_with_rect(100.0, 200.0);
        doc.start_editing(1, &[Property::Position], Editor::Local).unwrap();
        doc.set_live(1, PropertyValue::Position(Vec2::new(150.0, 250.0))).unwrap();
        doc.apply(&remote_move(500.0, 600.0, Vec2::new(100.0, 200.0))).unwrap();

        doc.cancel_editing(1, &[Property::Position]);
        assert_eq!(position(&doc), Vec2::new(500.0, 600.0));
        assert!(doc.overlay().is_empty());
    }

    #[test]
    fn test_cancel_without_remote_update_restores_original() {
        let mut doc = doc_with_rect(100.0, 200.0);
        doc.start_editing(1, &[Property::Position], Editor::Local).unwrap();
        doc.set_live(1, PropertyValue::Position(Vec2::new(150.0, 250.0))).unwrap();

        doc.cancel_editing(1, &[Property::Position]);
        assert_eq!(position(&doc), Vec2::new(100.0, 200.0));
    }

    #[test]
    fn test_isolation_is_per_property() {
        let mut doc = doc_with_rect(0.0, 0.0);
        doc.start_editing(1, &[Property::Position], Editor::Local).unwrap();

        doc.apply(&Op::UpdateRotation {
            id: 1,
            seq: 3,
            angle: 45.0,
            prev_angle: 0.0,
        })
        .unwrap();
        assert_eq!(doc.shape(1).unwrap().rotation, 45.0);
    }

    #[test]
    fn test_commit_emits_prev_from_durable() {
        let mut doc = doc_with_rect(100.0, 100.0);
        doc.start_editing(1, &[Property::Position], Editor::Local).unwrap();
        doc.set_live(1, PropertyValue::Position(Vec2::new(150.0, 150.0))).unwrap();
        doc.apply(&remote_move(500.0, 600.0, Vec2::new(100.0, 100.0))).unwrap();

        let ops = doc.commit_editing(1, &[Property::Position]);
        assert_eq!(
            ops,
            vec![Op::UpdatePosition {
                id: 1,
                seq: 0,
                x: 150.0,
                y: 150.0,
                prev_x: 500.0,
                prev_y: 600.0,
            }]
        );
        assert!(!doc.overlay().is_edited_by(1, Editor::Local));
    }

    #[test]
    fn test_commit_without_change_emits_nothing() {
        let mut doc = doc_with_rect(1.0, 1.0);
        doc.start_editing(1, &[Property::Position, Property::Color], Editor::Local)
            .unwrap();
        assert!(doc.commit_editing(1, &[Property::Position, Property::Color]).is_empty());
    }

    #[test]
    fn test_rebuild_keeps_live_and_refreshes_durable() {
        let mut doc = doc_with_rect(100.0, 100.0);
        doc.start_editing(1, &[Property::Position], Editor::Local).unwrap();
        doc.set_live(1, PropertyValue::Position(Vec2::new(150.0, 150.0))).unwrap();

        let mut fresh = ShapeTable::new();
        fresh
            .apply(&Op::create(Shape::new(1, ShapeKind::Rect, Vec2::new(500.0, 600.0), Color(7))))
            .unwrap();
        doc.rebuild(fresh);

        assert_eq!(position(&doc), Vec2::new(150.0, 150.0));
        assert_eq!(doc.shape(1).unwrap().color, Color(7));
        assert_eq!(
            doc.durable_shape(1).unwrap().position(),
            Vec2::new(500.0, 600.0)
        );
    }

    #[test]
    fn test_rebuild_drops_overlay_for_deleted_shape() {
        let mut doc = doc_with_rect(0.0, 0.0);
        doc.start_editing(1, &[Property::Scale], Editor::Local).unwrap();
        doc.link_editor(1, Editor::Remote(4));

        doc.rebuild(ShapeTable::new());
        assert!(doc.is_empty());
        assert!(doc.overlay().is_empty());
    }

    #[test]
    fn test_delete_clears_overlay() {
        let mut doc = doc_with_rect(0.0, 0.0);
        doc.start_editing(1, &[Property::Position], Editor::Local).unwrap();
        let shape = doc.shape(1).unwrap().clone();

        doc.apply(&Op::delete(shape)).unwrap();
        assert!(doc.overlay().is_empty());
    }

    #[test]
    fn test_start_editing_missing_shape() {
        let mut doc = Document::new();
        assert_eq!(
            doc.start_editing(5, &[Property::Position], Editor::Local),
            Err(ApplyError::NotFound(5))
        );
    }
}
