use glam::Vec2;
use stagehand_assets::{MaterialResolver, MeshProvider};
use stagehand_common::{CameraParams, EntityId};
use stagehand_ecs::SceneQuery;
use stagehand_render::{FrameBackend, Viewport};

use crate::gizmo::{Gizmo, Handle};
use crate::selection::Selection;

/// Result of a viewport click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickHit {
    Handle(Handle),
    Entity(EntityId),
    Nothing,
}

impl PickHit {
    pub fn entity(self) -> Option<EntityId> {
        match self {
            Self::Entity(id) => Some(id),
            _ => None,
        }
    }
}

/// Combines gizmo hit-testing with the id-buffer pick. Handles drawn over an
/// entity win, since overlays never reach the id channel.
#[derive(Debug, Clone, Copy)]
pub struct ViewportPick<'a> {
    pub gizmo: &'a Gizmo,
    pub selection: &'a Selection,
}

impl<'a> ViewportPick<'a> {
    pub fn new(gizmo: &'a Gizmo, selection: &'a Selection) -> Self {
        Self { gizmo, selection }
    }

    /// Exact pick at `cursor` (display pixels).
    pub fn at<B, R, P, S>(
        &self,
        viewport: &mut Viewport<B, R, P>,
        scene: &S,
        camera: &CameraParams,
        cursor: Vec2,
    ) -> PickHit
    where
        B: FrameBackend,
        R: MaterialResolver,
        P: MeshProvider,
        S: SceneQuery + ?Sized,
    {
        if let Some(handle) = self.handle_at(scene, camera, cursor) {
            return PickHit::Handle(handle);
        }
        viewport
            .entity_at(cursor)
            .map_or(PickHit::Nothing, PickHit::Entity)
    }

    /// Like [`ViewportPick::at`] but falls back to the fat pick, so thin
    /// geometry can be clicked.
    pub fn fat_at<B, R, P, S>(
        &self,
        viewport: &mut Viewport<B, R, P>,
        scene: &S,
        camera: &CameraParams,
        cursor: Vec2,
    ) -> PickHit
    where
        B: FrameBackend,
        R: MaterialResolver,
        P: MeshProvider,
        S: SceneQuery + ?Sized,
    {
        if let Some(handle) = self.handle_at(scene, camera, cursor) {
            return PickHit::Handle(handle);
        }
        viewport
            .object_id_at_fat(cursor)
            .map_or(PickHit::Nothing, PickHit::Entity)
    }

    fn handle_at<S: SceneQuery + ?Sized>(
        &self,
        scene: &S,
        camera: &CameraParams,
        cursor: Vec2,
    ) -> Option<Handle> {
        self.gizmo
            .pick_handle_at(cursor, camera, scene, self.selection)
    }
}

/// Apply a click result to the selection. Handle hits leave it unchanged;
/// `additive` toggles instead of replacing.
pub fn apply_click(selection: &mut Selection, hit: PickHit, additive: bool) {
    match (hit, additive) {
        (PickHit::Handle(_), _) => {}
        (PickHit::Entity(id), false) => selection.select(id),
        (PickHit::Entity(id), true) => {
            selection.toggle(id);
        }
        (PickHit::Nothing, false) => selection.clear(),
        (PickHit::Nothing, true) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_replaces_or_toggles() {
        let (a, b) = (EntityId(1), EntityId(2));
        let mut selection = Selection::new();
        apply_click(&mut selection, PickHit::Entity(a), false);
        apply_click(&mut selection, PickHit::Entity(b), true);
        assert_eq!(selection.ids(), &[a, b]);
        apply_click(&mut selection, PickHit::Handle(Handle::ScaleUniform), false);
        assert_eq!(selection.len(), 2);
        apply_click(&mut selection, PickHit::Entity(a), true);
        assert_eq!(selection.ids(), &[b]);
        apply_click(&mut selection, PickHit::Nothing, true);
        assert_eq!(selection.len(), 1);
        apply_click(&mut selection, PickHit::Nothing, false);
        assert!(selection.is_empty());
    }
}
