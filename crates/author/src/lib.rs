//! Viewport authoring: selection, the transform gizmo and undo/redo.
//!
//! # Invariants
//! - Every edit is reversible; a drag produces at most one composite edit.
//! - Gizmo updates recompute from drag-start snapshots and never write
//!   non-finite transforms.
//! - Gizmo handles win over entities under the same cursor.

mod editor;
mod gizmo;
mod pick;
mod selection;

pub use editor::{
    CompositeEdit, EditCommand, EditError, EditListener, Editor, EntitySnapshot, TransformChange,
};
pub use gizmo::{
    Axis, DragKind, DragSession, Gizmo, GizmoMode, GizmoSpace, Handle, HandleId, MIN_SCALE,
    PivotMode, Placement,
};
pub use pick::{PickHit, ViewportPick, apply_click};
pub use selection::Selection;
