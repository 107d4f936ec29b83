use anyhow::Context;
use glam::{UVec2, Vec2, Vec3};
use stagehand_assets::{MaterialLibrary, NoMeshProvider};
use stagehand_author::{
    Editor, Gizmo, GizmoMode, GizmoSpace, PickHit, PivotMode, Selection, ViewportPick,
    apply_click,
};
use stagehand_common::{CameraParams, EntityId, Transform};
use stagehand_ecs::{MaterialId, MeshKind, MeshRenderer, Scene, SceneMut, SceneQuery};
use stagehand_input::{Action, Bindings, KeyChord, ToolMode};
use stagehand_render::{FrameBackend, FrameOutput, Viewport, ViewportConfig};
use stagehand_render_wgpu::FlyCamera;
use stagehand_tools::{FrameReport, SceneInspector};

/// Cursor travel (pixels) before a press on empty space becomes a box select.
const BOX_SELECT_THRESHOLD: f32 = 4.0;

pub type EditorViewport<B> = Viewport<B, MaterialLibrary, NoMeshProvider>;

/// Everything the window edits, independent of the windowing layer.
pub struct AppState<B> {
    pub scene: Scene,
    pub viewport: EditorViewport<B>,
    pub editor: Editor,
    pub selection: Selection,
    pub gizmo: Gizmo,
    pub camera: FlyCamera,
    pub bindings: Bindings,
    pub show_inspector: bool,
    pub report: FrameReport,
    display: UVec2,
    cursor: Vec2,
    /// Press on empty space or an entity: start point and additive flag.
    press: Option<(Vec2, bool)>,
    spawned: u32,
}

impl<B: FrameBackend> AppState<B> {
    pub fn new(
        backend: B,
        config: ViewportConfig,
        materials: MaterialLibrary,
        bindings: Bindings,
        display: UVec2,
    ) -> anyhow::Result<Self> {
        let mut scene = Scene::new();
        stagehand_tools::demo::populate(&mut scene).context("populating demo scene")?;
        let gizmo = Gizmo::new(config.gizmo, config.snap);
        let mut viewport = Viewport::new(backend, materials, NoMeshProvider, config);
        viewport.resize(display).context("allocating render targets")?;
        Ok(Self {
            scene,
            viewport,
            editor: Editor::new(),
            selection: Selection::new(),
            gizmo,
            camera: FlyCamera::default(),
            bindings,
            show_inspector: true,
            report: FrameReport::default(),
            display,
            cursor: Vec2::ZERO,
            press: None,
            spawned: 0,
        })
    }

    pub fn display(&self) -> UVec2 {
        self.display
    }

    pub fn cursor(&self) -> Vec2 {
        self.cursor
    }

    pub fn camera_params(&self) -> CameraParams {
        self.camera.to_params(self.display)
    }

    pub fn resize(&mut self, display: UVec2) {
        let display = display.max(UVec2::ONE);
        self.display = display;
        if let Err(err) = self.viewport.resize(display) {
            tracing::warn!(%err, "resize failed");
        }
    }

    /// Render one frame: scene, selection outline and gizmo overlay.
    pub fn frame(&mut self) -> anyhow::Result<FrameOutput> {
        self.selection.retain_live(&self.scene);
        let camera = self.camera_params();
        let overlay = self.gizmo.overlay(&camera, &self.scene, &self.selection);
        let output = self
            .viewport
            .render(&self.scene, &camera, self.selection.ids(), &overlay)?;
        self.report = SceneInspector::frame(self.viewport.stats());
        tracing::trace!(report = %self.report, "frame");
        // The logs grow with every edit; the window only needs the count.
        let changes =
            self.scene.world.drain_events().len() + self.scene.components.drain_events().len();
        if changes > 0 {
            tracing::debug!(changes, "scene mutated since last frame");
        }
        Ok(output)
    }

    /// Cursor moved: drives a live drag, otherwise updates the hovered handle.
    pub fn cursor_moved(&mut self, cursor: Vec2) {
        self.cursor = cursor;
        if self.gizmo.is_dragging() {
            self.apply(Action::Drag { cursor });
            return;
        }
        let camera = self.camera_params();
        let hover = self
            .gizmo
            .pick_handle_at(cursor, &camera, &self.scene, &self.selection);
        self.gizmo.set_hover(hover);
    }

    pub fn key(&mut self, chord: KeyChord) {
        let action = self.bindings.resolve(chord);
        self.apply(action);
    }

    pub fn apply(&mut self, action: Action) {
        let camera = self.camera_params();
        match action {
            Action::MoveCamera(local) => self.camera.translate(local, 1.0),
            Action::LookCamera(delta) => self.camera.rotate(delta.x, delta.y),
            Action::FocusSelection => self.focus_selection(),
            Action::Press { cursor, additive } => {
                if self.gizmo.is_dragging() {
                    return;
                }
                self.cursor = cursor;
                let hit = ViewportPick::new(&self.gizmo, &self.selection).at(
                    &mut self.viewport,
                    &self.scene,
                    &camera,
                    cursor,
                );
                match hit {
                    PickHit::Handle(handle) => {
                        self.gizmo
                            .begin_drag(handle.id(), cursor, &camera, &self.scene, &self.selection);
                    }
                    other => {
                        apply_click(&mut self.selection, other, additive);
                        self.press = Some((cursor, additive));
                    }
                }
            }
            Action::Drag { cursor } => {
                self.cursor = cursor;
                self.gizmo.update_drag(cursor, &camera, &mut self.scene);
            }
            Action::Release => {
                if self.gizmo.is_dragging() {
                    if let Some(edit) = self.gizmo.end_drag(&self.scene) {
                        self.editor.record(edit);
                    }
                } else if let Some((start, additive)) = self.press.take() {
                    if start.distance(self.cursor) > BOX_SELECT_THRESHOLD {
                        self.box_select(start, self.cursor, additive);
                    }
                }
                self.press = None;
            }
            Action::CancelDrag => {
                self.gizmo.cancel_drag(&mut self.scene);
            }
            Action::BoxSelect { from, to } => self.box_select(from, to, false),
            Action::Select(id) => {
                if self.scene.contains(id) {
                    self.selection.select(id);
                }
            }
            Action::SelectAll => {
                let ids: Vec<EntityId> = self.scene.active_entities().collect();
                self.selection.select_all(ids);
            }
            Action::Deselect => self.selection.clear(),
            Action::SetTool(tool) => {
                self.gizmo.set_mode(match tool {
                    ToolMode::Translate => GizmoMode::Translate,
                    ToolMode::Rotate => GizmoMode::Rotate,
                    ToolMode::Scale => GizmoMode::Scale,
                });
            }
            Action::ToggleSpace => {
                self.gizmo.set_space(match self.gizmo.space() {
                    GizmoSpace::World => GizmoSpace::Local,
                    GizmoSpace::Local => GizmoSpace::World,
                });
            }
            Action::TogglePivot => {
                self.gizmo.set_pivot_mode(match self.gizmo.pivot_mode() {
                    PivotMode::Active => PivotMode::Center,
                    PivotMode::Center => PivotMode::Active,
                });
            }
            Action::ToggleSnap => {
                let mut snap = self.gizmo.snap();
                snap.enabled = !snap.enabled;
                self.gizmo.set_snap(snap);
            }
            Action::DeleteSelection => self.delete_selection(),
            Action::Undo => {
                if !self.gizmo.is_dragging() && self.editor.undo(&mut self.scene) {
                    self.selection.retain_live(&self.scene);
                }
            }
            Action::Redo => {
                if !self.gizmo.is_dragging() && self.editor.redo(&mut self.scene) {
                    self.selection.retain_live(&self.scene);
                }
            }
            Action::Noop => {}
        }
    }

    fn box_select(&mut self, from: Vec2, to: Vec2, additive: bool) {
        let ids = self.viewport.object_ids_in_rect(from, to);
        tracing::debug!(count = ids.len(), "box select");
        if additive {
            for id in ids {
                self.selection.add(id);
            }
        } else {
            self.selection.select_all(ids);
        }
    }

    fn focus_selection(&mut self) {
        let Some(placement) = self.gizmo.placement(&self.scene, &self.selection) else {
            return;
        };
        let radius = self
            .selection
            .active()
            .and_then(|id| self.scene.world_transform(id))
            .map_or(1.0, |t| t.max_abs_scale());
        self.camera.focus(placement.pivot, radius);
    }

    fn delete_selection(&mut self) {
        if self.gizmo.is_dragging() {
            return;
        }
        for id in self.selection.ids().to_vec() {
            if let Err(err) = self.editor.despawn(&mut self.scene, id) {
                tracing::warn!(%err, "delete failed");
            }
        }
        self.selection.clear();
    }

    /// Spawn a primitive in front of the camera and select it.
    pub fn spawn_primitive(&mut self, kind: MeshKind, material: MaterialId) {
        self.spawned += 1;
        let position = self.camera.position + self.camera.forward() * 6.0;
        let name = format!("{kind:?} {}", self.spawned).to_lowercase();
        let renderer = MeshRenderer::primitive(kind, material);
        match self
            .editor
            .spawn(&mut self.scene, name, Transform::from_position(position), renderer)
        {
            Ok(id) => self.selection.select(id),
            Err(err) => tracing::warn!(%err, "spawn failed"),
        }
    }

    /// Inspector edit of one entity's local transform, recorded for undo.
    pub fn edit_transform(&mut self, id: EntityId, transform: Transform) {
        if self.scene.local_transform(id) == Some(transform) || !transform.is_finite() {
            return;
        }
        if let Err(err) = self.editor.set_transform(&mut self.scene, id, transform) {
            tracing::warn!(%err, "transform edit failed");
        }
    }

    /// Replace a material in the library and tell the viewport it changed.
    pub fn edit_material_color(&mut self, id: MaterialId, color: glam::Vec4) {
        let library = self.viewport.assets_mut().materials.resolver_mut();
        let Some(mut desc) = library.get(id).cloned() else {
            return;
        };
        let name = library.name(id).unwrap_or("material").to_string();
        desc.base_color = color;
        library.set_material(id, name, desc);
        self.viewport.material_changed(id);
    }

    /// Camera-space movement from held keys over `dt` seconds.
    pub fn fly(&mut self, direction: Vec3, dt: f32) {
        if direction != Vec3::ZERO {
            self.apply(Action::MoveCamera(direction * dt));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_author::{Axis, Handle};
    use stagehand_render::SoftwareBackend;

    fn state() -> AppState<SoftwareBackend> {
        let config = ViewportConfig {
            post_effects: Vec::new(),
            ..ViewportConfig::default()
        };
        let mut state = AppState::new(
            SoftwareBackend::new(),
            config,
            stagehand_tools::demo::materials(),
            Bindings::default(),
            UVec2::new(320, 240),
        )
        .unwrap();
        state.frame().unwrap();
        state
    }

    fn find(state: &AppState<SoftwareBackend>, name: &str) -> EntityId {
        state
            .scene
            .active_entities()
            .find(|id| state.scene.name(*id) == Some(name))
            .unwrap()
    }

    fn click(state: &mut AppState<SoftwareBackend>, cursor: Vec2) {
        state.apply(Action::Press {
            cursor,
            additive: false,
        });
        state.apply(Action::Release);
    }

    fn pixel_of(state: &AppState<SoftwareBackend>, world: Vec3) -> Vec2 {
        state.camera_params().world_to_pixel(world).unwrap()
    }

    #[test]
    fn click_selects_and_empty_click_clears() {
        let mut state = state();
        let sphere = find(&state, "sphere");
        let at = pixel_of(&state, state.scene.world_transform(sphere).unwrap().position);
        click(&mut state, at);
        assert_eq!(state.selection.ids(), &[sphere]);

        // Sky above the horizon.
        click(&mut state, Vec2::new(2.0, 2.0));
        assert!(state.selection.is_empty());
    }

    #[test]
    fn handle_drag_is_one_undo_step() {
        let mut state = state();
        let sphere = find(&state, "sphere");
        state.apply(Action::Select(sphere));
        state.frame().unwrap();

        let camera = state.camera_params();
        let pivot = state.scene.world_transform(sphere).unwrap().position;
        let length = state.gizmo.handle_length(&camera, pivot).unwrap();
        let start = pixel_of(&state, pivot + Vec3::X * length * 0.6);
        let end = pixel_of(&state, pivot + Vec3::X * (length * 0.6 + 2.0));

        state.cursor_moved(start);
        assert_eq!(state.gizmo.hover(), Some(Handle::TranslateAxis(Axis::X)));
        state.apply(Action::Press {
            cursor: start,
            additive: false,
        });
        assert!(state.gizmo.is_dragging());
        state.cursor_moved(end);
        state.apply(Action::Release);
        assert!(!state.gizmo.is_dragging());

        let moved = state.scene.world_transform(sphere).unwrap().position;
        assert!((moved.x - (pivot.x + 2.0)).abs() < 1e-2, "moved to {moved}");
        assert_eq!(state.selection.ids(), &[sphere]);
        assert_eq!(state.editor.undo_count(), 1);

        state.apply(Action::Undo);
        assert_eq!(state.scene.world_transform(sphere).unwrap().position, pivot);
    }

    #[test]
    fn escape_cancels_a_drag() {
        let mut state = state();
        let cube = find(&state, "cube");
        state.apply(Action::Select(cube));
        let camera = state.camera_params();
        let before = state.scene.local_transform(cube).unwrap();
        let length = state.gizmo.handle_length(&camera, before.position).unwrap();
        let start = pixel_of(&state, before.position + Vec3::X * length * 0.6);
        state.apply(Action::Press {
            cursor: start,
            additive: false,
        });
        state.cursor_moved(start + Vec2::new(40.0, 0.0));
        assert_ne!(state.scene.local_transform(cube).unwrap(), before);

        state.key("escape".parse().unwrap());
        assert!(!state.gizmo.is_dragging());
        assert_eq!(state.scene.local_transform(cube).unwrap(), before);
        assert_eq!(state.editor.undo_count(), 0);
    }

    #[test]
    fn delete_then_undo_restores_the_entity() {
        let mut state = state();
        let cone = find(&state, "cone");
        state.apply(Action::Select(cone));
        state.key("delete".parse().unwrap());
        assert!(!state.scene.contains(cone));
        assert!(state.selection.is_empty());

        state.key("ctrl+z".parse().unwrap());
        assert!(state.scene.contains(cone));
        assert_eq!(state.scene.name(cone), Some("cone"));
    }

    #[test]
    fn box_select_covers_the_view() {
        let mut state = state();
        state.apply(Action::Press {
            cursor: Vec2::new(1.0, 1.0),
            additive: false,
        });
        state.cursor_moved(Vec2::new(318.0, 238.0));
        state.apply(Action::Release);
        assert!(state.selection.len() >= 5);
        assert!(state.selection.contains(find(&state, "sphere")));
    }

    #[test]
    fn tool_keys_switch_the_gizmo() {
        let mut state = state();
        state.key("e".parse().unwrap());
        assert_eq!(state.gizmo.mode(), GizmoMode::Rotate);
        state.key("x".parse().unwrap());
        assert_eq!(state.gizmo.space(), GizmoSpace::Local);
        state.key("tab".parse().unwrap());
        assert!(state.gizmo.snap().enabled);
    }

    #[test]
    fn material_edit_reaches_the_next_frame() {
        let mut state = state();
        let sphere = find(&state, "sphere");
        let material = state.scene.mesh_renderer(sphere).unwrap().material;
        let color = glam::Vec4::new(0.1, 0.2, 0.3, 1.0);
        state.edit_material_color(material, color);
        assert!(state.viewport.assets().materials.is_stale(material));
        state.frame().unwrap();
        let runtime = state.viewport.assets().materials.peek(material).unwrap();
        assert_eq!(runtime.desc.base_color, color);
    }
}
