//! Shape records and the editable properties they expose.
//!
//! A [`Shape`] serializes directly as the checkpoint shape record:
//! ```text
//! { "id": 1000001, "type": "rect", "x": 100.0, "y": 100.0,
//!   "rotation": 0.0, "scaleX": 1.0, "scaleY": 1.0, "color": 16711680 }
//! ```

use serde::{Deserialize, Serialize};

/// Stable shape identifier. Survives rebuilds of local state.
pub type ShapeId = u64;

/// Identifier the authority hands out per connection.
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rect,
    Ellipse,
}

/// 2D value in document coordinates (positions and scale factors).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };
    pub const ONE: Vec2 = Vec2 { x: 1.0, y: 1.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Packed `0xRRGGBB` color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Color = Color(0x000000);

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    pub fn components(self) -> (u8, u8, u8) {
        ((self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8)
    }
}

/// A vector shape as held by the authority and every replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: ShapeId,
    #[serde(rename = "type")]
    pub kind: ShapeKind,
    pub x: f64,
    pub y: f64,
    /// Rotation in degrees.
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub color: Color,
}

impl Shape {
    /// Unrotated, unit-scale shape at `position`.
    pub fn new(id: ShapeId, kind: ShapeKind, position: Vec2, color: Color) -> Self {
        Self {
            id,
            kind,
            x: position.x,
            y: position.y,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            color,
        }
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn scale(&self) -> Vec2 {
        Vec2::new(self.scale_x, self.scale_y)
    }

    /// Read one editable property.
    pub fn get(&self, property: Property) -> PropertyValue {
        match property {
            Property::Position => PropertyValue::Position(self.position()),
            Property::Rotation => PropertyValue::Rotation(self.rotation),
            Property::Scale => PropertyValue::Scale(self.scale()),
            Property::Color => PropertyValue::Color(self.color),
        }
    }

    /// Overwrite one editable property.
    pub fn set(&mut self, value: PropertyValue) {
        match value {
            PropertyValue::Position(p) => {
                self.x = p.x;
                self.y = p.y;
            }
            PropertyValue::Rotation(angle) => self.rotation = angle,
            PropertyValue::Scale(s) => {
                self.scale_x = s.x;
                self.scale_y = s.y;
            }
            PropertyValue::Color(c) => self.color = c,
        }
    }
}

/// Properties that can be edited independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    Position,
    Rotation,
    Scale,
    Color,
}

impl Property {
    pub const ALL: [Property; 4] = [
        Property::Position,
        Property::Rotation,
        Property::Scale,
        Property::Color,
    ];
}

/// A value for one [`Property`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "property", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Position(Vec2),
    Rotation(f64),
    Scale(Vec2),
    Color(Color),
}

impl PropertyValue {
    pub fn property(&self) -> Property {
        match self {
            PropertyValue::Position(_) => Property::Position,
            PropertyValue::Rotation(_) => Property::Rotation,
            PropertyValue::Scale(_) => Property::Scale,
            PropertyValue::Color(_) => Property::Color,
        }
    }
}
