//! # tandem-core
//!
//! Data model for the Tandem shape editor: shapes, the closed set of
//! replicated ops, the shape table every participant applies them to, and
//! the client-side pieces that sit on top of it (editing isolation and
//! undo/redo).
//!
//! Nothing in this crate does I/O. The networked parts live in
//! `tandem-collab`.
//!
//! ```text
//!  intent ─► History ─► Op ─► ShapeTable::apply   (authority)
//!                        └──► Document::apply     (replica, via overlay)
//! ```

pub mod document;
pub mod editing;
pub mod history;
pub mod op;
pub mod shape;
pub mod table;

pub use document::Document;
pub use editing::{DurableShadow, Editor, EditingOverlay};
pub use history::{History, HistoryEntry, LocalOp, DEFAULT_HISTORY_DEPTH};
pub use op::{Op, Seq, UNASSIGNED_SEQ};
pub use shape::{ClientId, Color, Property, PropertyValue, Shape, ShapeId, ShapeKind, Vec2};
pub use table::{ApplyError, Checkpoint, ShapeLookup, ShapeTable};
