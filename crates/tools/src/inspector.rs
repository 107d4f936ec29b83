use std::fmt;

use stagehand_common::EntityId;
use stagehand_ecs::{MaterialId, MeshKind, Scene, SceneMut, SceneQuery};
use stagehand_render::FrameStats;

/// Scene inspector for developer tooling.
///
/// Provides read-only queries against the scene for the desktop side panel
/// and the CLI.
pub struct SceneInspector;

impl SceneInspector {
    pub fn summary(scene: &Scene) -> SceneSummary {
        SceneSummary {
            entity_count: scene.world.entity_count(),
            active_count: scene.active_entities().count(),
            renderable_count: scene.components.mesh_renderers().len(),
            pending_events: scene.world.events().len(),
        }
    }

    pub fn inspect_entity(scene: &Scene, id: EntityId) -> Option<EntityInfo> {
        let data = scene.world.get(id)?;
        let world = scene.world_transform(id)?;
        let local = scene.local_transform(id)?;
        let renderer = scene.components.get_mesh_renderer(id);
        let r = local.rotation;
        Some(EntityInfo {
            id,
            name: scene.name(id).map(str::to_owned),
            parent: data.parent,
            active: data.active,
            position: local.position.to_array(),
            rotation: [r.x, r.y, r.z, r.w],
            scale: local.scale.to_array(),
            world_position: world.position.to_array(),
            mesh: renderer.map(|m| m.mesh.kind()),
            material: renderer.map(|m| m.material),
        })
    }

    /// Every entity id in deterministic order, active or not.
    pub fn list_entities(scene: &Scene) -> Vec<EntityId> {
        scene.world.entities().keys().copied().collect()
    }

    pub fn frame(stats: &FrameStats) -> FrameReport {
        let output = stats.output.as_ref();
        FrameReport {
            frame_index: stats.frame_index,
            considered: stats.list.considered,
            culled: stats.list.culled,
            emitted: stats.list.emitted,
            stages_run: output.map_or(0, |o| o.stages_run),
            fallback_used: output.is_some_and(|o| o.fallback_used),
            temporal_applied: output.is_some_and(|o| o.temporal_applied),
            skipped_effects: output.map(|o| o.skipped_effects.clone()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSummary {
    pub entity_count: usize,
    pub active_count: usize,
    pub renderable_count: usize,
    pub pending_events: usize,
}

impl fmt::Display for SceneSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scene: entities={} active={} renderables={} pending_events={}",
            self.entity_count, self.active_count, self.renderable_count, self.pending_events
        )
    }
}

/// Detailed info about a single entity. Transform fields are local.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInfo {
    pub id: EntityId,
    pub name: Option<String>,
    pub parent: Option<EntityId>,
    pub active: bool,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub world_position: [f32; 3],
    pub mesh: Option<MeshKind>,
    pub material: Option<MaterialId>,
}

impl fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entity {} `{}` pos=({:.2}, {:.2}, {:.2}) scale=({:.2}, {:.2}, {:.2})",
            self.id,
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.position[0],
            self.position[1],
            self.position[2],
            self.scale[0],
            self.scale[1],
            self.scale[2],
        )?;
        if let Some(parent) = self.parent {
            write!(f, " parent={parent}")?;
        }
        if let Some(mesh) = self.mesh {
            write!(f, " mesh={mesh:?}")?;
        }
        Ok(())
    }
}

/// Flattened [`FrameStats`] for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    pub considered: usize,
    pub culled: usize,
    pub emitted: usize,
    pub stages_run: usize,
    pub fallback_used: bool,
    pub temporal_applied: bool,
    pub skipped_effects: Vec<&'static str>,
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame {}: drawn={}/{} culled={} post_stages={}",
            self.frame_index, self.emitted, self.considered, self.culled, self.stages_run
        )?;
        if self.fallback_used {
            f.write_str(" fallback")?;
        }
        if self.temporal_applied {
            f.write_str(" temporal")?;
        }
        if !self.skipped_effects.is_empty() {
            write!(f, " skipped=[{}]", self.skipped_effects.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec2, Vec3};
    use stagehand_common::Transform;
    use stagehand_ecs::MeshRenderer;
    use stagehand_render::{ColorSource, FrameOutput, RenderListStats};

    fn cube() -> MeshRenderer {
        MeshRenderer::primitive(MeshKind::Cube, MaterialId(3))
    }

    #[test]
    fn summary_empty_scene() {
        let scene = Scene::new();
        let summary = SceneInspector::summary(&scene);
        assert_eq!(summary.entity_count, 0);
        assert_eq!(summary.renderable_count, 0);
    }

    #[test]
    fn summary_counts_inactive_separately() {
        let mut scene = Scene::new();
        let a = scene.spawn_mesh("a", Transform::IDENTITY, cube()).unwrap();
        scene.spawn_mesh("b", Transform::IDENTITY, cube()).unwrap();
        scene.world.set_active(a, false);

        let summary = SceneInspector::summary(&scene);
        assert_eq!(summary.entity_count, 2);
        assert_eq!(summary.active_count, 1);
        assert_eq!(summary.renderable_count, 2);
        assert!(summary.to_string().contains("entities=2"));
    }

    #[test]
    fn inspect_entity_reports_local_and_world() {
        let mut scene = Scene::new();
        let parent = scene
            .spawn_mesh("root", Transform::from_position(Vec3::new(1.0, 0.0, 0.0)), cube())
            .unwrap();
        let child = scene
            .world
            .spawn_child(parent, Transform::from_position(Vec3::new(0.0, 2.0, 0.0)))
            .unwrap();

        let info = SceneInspector::inspect_entity(&scene, child).unwrap();
        assert_eq!(info.parent, Some(parent));
        assert_eq!(info.position, [0.0, 2.0, 0.0]);
        assert_eq!(info.world_position, [1.0, 2.0, 0.0]);
        assert_eq!(info.mesh, None);
        assert!(info.to_string().contains("<unnamed>"));

        let root = SceneInspector::inspect_entity(&scene, parent).unwrap();
        assert_eq!(root.name.as_deref(), Some("root"));
        assert_eq!(root.material, Some(MaterialId(3)));
        assert!(root.to_string().contains("mesh=Cube"));
    }

    #[test]
    fn inspect_missing_entity() {
        let scene = Scene::new();
        assert!(SceneInspector::inspect_entity(&scene, EntityId(42)).is_none());
    }

    #[test]
    fn list_entities_in_id_order() {
        let mut scene = Scene::new();
        let a = scene.spawn_mesh("a", Transform::IDENTITY, cube()).unwrap();
        let b = scene.spawn_mesh("b", Transform::IDENTITY, cube()).unwrap();
        assert_eq!(SceneInspector::list_entities(&scene), vec![a, b]);
    }

    #[test]
    fn frame_report_flattens_stats() {
        assert_eq!(SceneInspector::frame(&FrameStats::default()), FrameReport::default());

        let stats = FrameStats {
            frame_index: 7,
            list: RenderListStats {
                considered: 5,
                culled: 2,
                emitted: 3,
            },
            output: Some(FrameOutput {
                color: ColorSource::Primary,
                size: UVec2::new(64, 48),
                stages_run: 2,
                fallback_used: true,
                temporal_applied: false,
                skipped_effects: vec!["vignette"],
                items_drawn: 3,
            }),
        };
        let report = SceneInspector::frame(&stats);
        assert_eq!(report.emitted, 3);
        assert!(report.fallback_used);
        let text = report.to_string();
        assert!(text.contains("drawn=3/5"));
        assert!(text.contains("fallback"));
        assert!(text.contains("skipped=[vignette]"));
    }
}
