use std::path::Path;

use anyhow::{Context, bail};
use glam::{UVec2, Vec3};
use stagehand_assets::{MaterialLibrary, NoMeshProvider};
use stagehand_author::{Editor, Gizmo, Selection};
use stagehand_common::{CameraParams, EntityId};
use stagehand_ecs::{Scene, SceneQuery};
use stagehand_render::{FrameOutput, SoftwareBackend, Viewport, ViewportConfig};

pub type HeadlessViewport = Viewport<SoftwareBackend, MaterialLibrary, NoMeshProvider>;

/// Everything one headless command needs: the demo scene, a software
/// viewport and the authoring state.
pub struct Session {
    pub scene: Scene,
    pub viewport: HeadlessViewport,
    pub camera: CameraParams,
    pub selection: Selection,
    pub gizmo: Gizmo,
    pub editor: Editor,
}

pub fn default_camera(size: UVec2) -> CameraParams {
    CameraParams::look_at(
        Vec3::new(6.0, 5.0, 9.0),
        Vec3::new(0.0, 0.5, 0.0),
        Vec3::Y,
        55f32.to_radians(),
        0.1,
        200.0,
        size,
    )
}

impl Session {
    pub fn new(config: ViewportConfig, materials: MaterialLibrary, size: UVec2) -> anyhow::Result<Self> {
        let mut scene = Scene::new();
        stagehand_tools::demo::populate(&mut scene).context("populating demo scene")?;
        let gizmo = Gizmo::new(config.gizmo, config.snap);
        let mut viewport = Viewport::new(SoftwareBackend::new(), materials, NoMeshProvider, config);
        viewport.resize(size).context("allocating render targets")?;
        Ok(Self {
            scene,
            viewport,
            camera: default_camera(size),
            selection: Selection::new(),
            gizmo,
            editor: Editor::new(),
        })
    }

    /// First active entity called `name`.
    pub fn find(&self, name: &str) -> Option<EntityId> {
        self.scene
            .active_entities()
            .find(|id| self.scene.name(*id) == Some(name))
    }

    pub fn select_names(&mut self, names: &[String]) -> anyhow::Result<()> {
        for name in names {
            let Some(id) = self.find(name) else {
                bail!("no entity named `{name}`");
            };
            self.selection.add(id);
        }
        Ok(())
    }

    /// Render one frame with the gizmo overlay for the current selection.
    pub fn render(&mut self) -> anyhow::Result<FrameOutput> {
        let overlay = self.gizmo.overlay(&self.camera, &self.scene, &self.selection);
        let output = self
            .viewport
            .render(&self.scene, &self.camera, self.selection.ids(), &overlay)?;
        Ok(output)
    }

    pub fn save_png(&mut self, path: &Path) -> anyhow::Result<()> {
        let color = self.viewport.read_current_color()?;
        let image = image::RgbaImage::from_raw(color.size.x, color.size.y, color.to_rgba8())
            .context("color readback has the wrong length")?;
        image
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), width = color.size.x, height = color.size.y, "saved frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            ViewportConfig::default(),
            stagehand_tools::demo::materials(),
            UVec2::new(160, 120),
        )
        .unwrap()
    }

    #[test]
    fn finds_demo_entities_by_name() {
        let mut session = session();
        assert!(session.find("sphere").is_some());
        assert!(session.find("nope").is_none());
        session.select_names(&["cube".into(), "cone".into()]).unwrap();
        assert_eq!(session.selection.len(), 2);
        assert!(session.select_names(&["ghost".into()]).is_err());
    }

    #[test]
    fn sphere_is_under_its_projection() {
        let mut session = session();
        session.render().unwrap();
        let sphere = session.find("sphere").unwrap();
        let center = session
            .camera
            .world_to_pixel(session.scene.world_transform(sphere).unwrap().position)
            .unwrap();
        assert_eq!(session.viewport.entity_at(center), Some(sphere));
    }

    #[test]
    fn saves_a_png() {
        let mut session = session();
        session.render().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        session.save_png(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
