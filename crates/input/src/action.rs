use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use stagehand_common::EntityId;

/// Gizmo tool selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    Translate,
    Rotate,
    Scale,
}

/// A high-level viewport action.
///
/// Cursor positions are display pixels with a top-left origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Fly the camera: `x` right, `y` up, `z` forward, scaled by frame time.
    MoveCamera(Vec3),
    /// Mouse-look delta in pixels.
    LookCamera(Vec2),
    /// Frame the selection.
    FocusSelection,
    /// Press in the viewport: starts a gizmo drag or picks an entity.
    /// `additive` toggles membership instead of replacing the selection.
    Press { cursor: Vec2, additive: bool },
    /// Cursor moved while pressed.
    Drag { cursor: Vec2 },
    /// Release ends a live drag.
    Release,
    /// Abort a live drag, restoring transforms.
    CancelDrag,
    /// Rectangle select between two corners.
    BoxSelect { from: Vec2, to: Vec2 },
    Select(EntityId),
    SelectAll,
    Deselect,
    SetTool(ToolMode),
    /// Flip between world and local gizmo space.
    ToggleSpace,
    /// Flip between active-entity and centroid pivots.
    TogglePivot,
    ToggleSnap,
    DeleteSelection,
    Undo,
    Redo,
    /// Unbound input.
    Noop,
}

impl Action {
    /// Actions that change entity transforms or the scene.
    pub fn is_edit(&self) -> bool {
        matches!(
            self,
            Self::Drag { .. } | Self::Release | Self::DeleteSelection | Self::Undo | Self::Redo
        )
    }

    /// Actions that are only meaningful while a drag is live.
    pub fn needs_drag(&self) -> bool {
        matches!(self, Self::Drag { .. } | Self::Release | Self::CancelDrag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drag_actions_need_a_session() {
        assert!(Action::Drag { cursor: Vec2::ZERO }.needs_drag());
        assert!(Action::CancelDrag.needs_drag());
        assert!(!Action::Undo.needs_drag());
        assert!(!Action::Press { cursor: Vec2::ZERO, additive: false }.needs_drag());
    }

    #[test]
    fn edits_are_classified() {
        assert!(Action::Undo.is_edit());
        assert!(Action::DeleteSelection.is_edit());
        assert!(!Action::MoveCamera(Vec3::Z).is_edit());
        assert!(!Action::SetTool(ToolMode::Rotate).is_edit());
    }
}
