use egui::Context as EguiContext;
use glam::{EulerRot, Quat, Vec3, Vec4};
use stagehand_author::{GizmoMode, GizmoSpace, PivotMode};
use stagehand_common::{EntityId, Transform};
use stagehand_ecs::{MeshKind, SceneMut, SceneQuery};
use stagehand_input::{Action, ToolMode};
use stagehand_render::FrameBackend;
use stagehand_tools::{SceneInspector, demo};

use crate::state::AppState;

const PRIMITIVES: [MeshKind; 5] = [
    MeshKind::Cube,
    MeshKind::Sphere,
    MeshKind::Plane,
    MeshKind::Cylinder,
    MeshKind::Cone,
];

fn vec3_row(ui: &mut egui::Ui, label: &str, value: &mut Vec3, speed: f64) {
    ui.label(label);
    ui.horizontal(|ui| {
        ui.add(egui::DragValue::new(&mut value.x).prefix("X: ").speed(speed));
        ui.add(egui::DragValue::new(&mut value.y).prefix("Y: ").speed(speed));
        ui.add(egui::DragValue::new(&mut value.z).prefix("Z: ").speed(speed));
    });
}

impl<B: FrameBackend> AppState<B> {
    pub fn draw_ui(&mut self, ctx: &EguiContext) {
        if !self.show_inspector {
            return;
        }
        // Buttons queue the same actions the key bindings produce.
        let mut actions = Vec::new();

        egui::SidePanel::left("inspector")
            .default_width(290.0)
            .show(ctx, |ui| {
                ui.heading("Stagehand");
                ui.separator();
                ui.label(SceneInspector::summary(&self.scene).to_string());
                ui.label(self.report.to_string());
                ui.label(format!(
                    "Camera: ({:.1}, {:.1}, {:.1})",
                    self.camera.position.x, self.camera.position.y, self.camera.position.z
                ));
                ui.separator();

                self.tool_section(ui, &mut actions);
                ui.separator();
                self.render_section(ui);
                ui.separator();
                self.entity_section(ui, &mut actions);

                if let Some(id) = self.selection.active() {
                    ui.separator();
                    self.transform_section(ui, id);
                    self.material_section(ui, id);
                }
            });

        for action in actions {
            self.apply(action);
        }
    }

    fn tool_section(&mut self, ui: &mut egui::Ui, actions: &mut Vec<Action>) {
        ui.heading("Gizmo");
        let mode = self.gizmo.mode();
        ui.horizontal(|ui| {
            for (label, tool, gizmo_mode) in [
                ("Move (W)", ToolMode::Translate, GizmoMode::Translate),
                ("Rotate (E)", ToolMode::Rotate, GizmoMode::Rotate),
                ("Scale (R)", ToolMode::Scale, GizmoMode::Scale),
            ] {
                if ui.selectable_label(mode == gizmo_mode, label).clicked() {
                    actions.push(Action::SetTool(tool));
                }
            }
        });
        ui.horizontal(|ui| {
            let space = match self.gizmo.space() {
                GizmoSpace::World => "World",
                GizmoSpace::Local => "Local",
            };
            if ui.button(format!("Space: {space} (X)")).clicked() {
                actions.push(Action::ToggleSpace);
            }
            let pivot = match self.gizmo.pivot_mode() {
                PivotMode::Active => "Active",
                PivotMode::Center => "Center",
            };
            if ui.button(format!("Pivot: {pivot} (P)")).clicked() {
                actions.push(Action::TogglePivot);
            }
        });

        let mut snap = self.gizmo.snap();
        ui.checkbox(&mut snap.enabled, "Snap (Tab)");
        ui.horizontal(|ui| {
            ui.add(
                egui::DragValue::new(&mut snap.move_step)
                    .prefix("move ")
                    .speed(0.05)
                    .range(0.0..=100.0),
            );
            let mut degrees = snap.angle_step.to_degrees();
            ui.add(
                egui::DragValue::new(&mut degrees)
                    .prefix("deg ")
                    .speed(1.0)
                    .range(0.0..=180.0),
            );
            snap.angle_step = degrees.to_radians();
            ui.add(
                egui::DragValue::new(&mut snap.scale_step)
                    .prefix("scale ")
                    .speed(0.01)
                    .range(0.0..=10.0),
            );
        });
        if snap != self.gizmo.snap() {
            self.gizmo.set_snap(snap);
        }
    }

    fn render_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Render");
        let mut config = self.viewport.config().clone();
        ui.checkbox(&mut config.outline.enabled, "Selection outline");
        ui.checkbox(&mut config.temporal.enabled, "Temporal resolve");
        ui.checkbox(&mut config.wireframe, "Wireframe");
        ui.add(
            egui::Slider::new(&mut config.render_scale, 0.25..=2.0)
                .text("render scale")
                .step_by(0.25),
        );
        if config != *self.viewport.config() {
            if let Err(err) = self.viewport.set_config(config) {
                tracing::warn!(%err, "render config rejected");
            }
        }
    }

    fn entity_section(&mut self, ui: &mut egui::Ui, actions: &mut Vec<Action>) {
        ui.heading("Entities");
        ui.horizontal_wrapped(|ui| {
            for kind in PRIMITIVES {
                if ui.button(format!("+ {kind:?}")).clicked() {
                    self.spawn_primitive(kind, demo::GREEN);
                }
            }
        });
        ui.horizontal(|ui| {
            if ui.button("Delete (Del)").clicked() {
                actions.push(Action::DeleteSelection);
            }
            if ui.button("Undo").clicked() {
                actions.push(Action::Undo);
            }
            if ui.button("Redo").clicked() {
                actions.push(Action::Redo);
            }
        });
        ui.label(format!(
            "Undo: {} / Redo: {}",
            self.editor.undo_count(),
            self.editor.redo_count()
        ));

        egui::ScrollArea::vertical()
            .max_height(220.0)
            .show(ui, |ui| {
                let ids: Vec<EntityId> = self.scene.active_entities().collect();
                for id in ids {
                    let name = self.scene.name(id).unwrap_or("<unnamed>");
                    let depth =
                        std::iter::successors(self.scene.parent(id), |p| self.scene.parent(*p))
                            .count();
                    let label = format!("{}{name}", "  ".repeat(depth));
                    let response = ui.selectable_label(self.selection.contains(id), label);
                    if response.clicked() {
                        if ui.input(|i| i.modifiers.shift) {
                            self.selection.toggle(id);
                        } else {
                            actions.push(Action::Select(id));
                        }
                    }
                }
            });
    }

    fn transform_section(&mut self, ui: &mut egui::Ui, id: EntityId) {
        ui.heading("Transform");
        let Some(transform) = self.scene.local_transform(id) else {
            return;
        };
        if self.gizmo.is_dragging() {
            ui.label(format!("{transform:?}"));
            return;
        }
        let mut position = transform.position;
        let (y, x, z) = transform.rotation.to_euler(EulerRot::YXZ);
        let mut euler = Vec3::new(x, y, z) * 180.0 / std::f32::consts::PI;
        let before_euler = euler;
        let mut scale = transform.scale;

        vec3_row(ui, "Position:", &mut position, 0.05);
        vec3_row(ui, "Rotation (deg):", &mut euler, 0.5);
        vec3_row(ui, "Scale:", &mut scale, 0.02);

        let rotation = if euler == before_euler {
            transform.rotation
        } else {
            let r = euler * std::f32::consts::PI / 180.0;
            Quat::from_euler(EulerRot::YXZ, r.y, r.x, r.z)
        };
        self.edit_transform(
            id,
            Transform {
                position,
                rotation,
                scale,
            },
        );
    }

    fn material_section(&mut self, ui: &mut egui::Ui, id: EntityId) {
        let Some(renderer) = self.scene.mesh_renderer(id) else {
            return;
        };
        let material = renderer.material;
        let Some(desc) = self.viewport.assets().materials.resolver().get(material) else {
            return;
        };
        let mut rgba = desc.base_color.to_array();
        ui.horizontal(|ui| {
            ui.label(format!("Material {}", material.0));
            if ui.color_edit_button_rgba_unmultiplied(&mut rgba).changed() {
                self.edit_material_color(material, Vec4::from_array(rgba));
            }
        });
    }
}
