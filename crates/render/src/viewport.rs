use glam::{UVec2, Vec2, Vec3};
use stagehand_assets::{MaterialResolver, MeshProvider};
use stagehand_common::{CameraParams, EntityId, ObjectId};
use stagehand_ecs::{MaterialId, SceneQuery};

use crate::config::ViewportConfig;
use crate::overlay::OverlayList;
use crate::picking;
use crate::pipeline::{BackendError, ColorImage, FrameBackend, FrameContext, FrameOutput, FramePipeline, TargetError};
use crate::post::ColorSource;
use crate::render_list::{RenderAssets, RenderListStats, build_render_list};

/// Summary of the last frame, for inspectors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameStats {
    pub frame_index: u64,
    pub list: RenderListStats,
    pub output: Option<FrameOutput>,
}

/// Render-list builder, frame pipeline and caches behind one handle.
///
/// Cursor positions are in display pixels (top-left origin) and are mapped to
/// the render resolution before touching the id or depth channels.
#[derive(Debug)]
pub struct Viewport<B, R, P> {
    pipeline: FramePipeline<B>,
    assets: RenderAssets<R, P>,
    display_size: UVec2,
    camera: Option<CameraParams>,
    stats: FrameStats,
}

impl<B, R, P> Viewport<B, R, P>
where
    B: FrameBackend,
    R: MaterialResolver,
    P: MeshProvider,
{
    pub fn new(backend: B, resolver: R, provider: P, config: ViewportConfig) -> Self {
        Self {
            pipeline: FramePipeline::new(backend, config),
            assets: RenderAssets::new(resolver, provider),
            display_size: UVec2::ZERO,
            camera: None,
            stats: FrameStats::default(),
        }
    }

    pub fn config(&self) -> &ViewportConfig {
        self.pipeline.config()
    }

    /// Apply a new configuration; a changed render scale reallocates targets.
    pub fn set_config(&mut self, config: ViewportConfig) -> Result<(), TargetError> {
        let rescale = config.render_scale != self.pipeline.config().render_scale;
        self.pipeline.set_config(config);
        if rescale && self.display_size != UVec2::ZERO {
            self.pipeline.resize(self.display_size)?;
        }
        Ok(())
    }

    pub fn pipeline(&self) -> &FramePipeline<B> {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut FramePipeline<B> {
        &mut self.pipeline
    }

    pub fn assets(&self) -> &RenderAssets<R, P> {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut RenderAssets<R, P> {
        &mut self.assets
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn display_size(&self) -> UVec2 {
        self.display_size
    }

    /// New display size; targets are reallocated only if the render size
    /// changes.
    pub fn resize(&mut self, display: UVec2) -> Result<bool, TargetError> {
        self.display_size = display;
        self.pipeline.resize(display)
    }

    /// "Material changed" notification: the next frame reloads `id`.
    pub fn material_changed(&mut self, id: MaterialId) -> bool {
        self.assets.materials.invalidate(id)
    }

    /// Build the render list and run one frame.
    pub fn render<S: SceneQuery + ?Sized>(
        &mut self,
        scene: &S,
        camera: &CameraParams,
        selection: &[EntityId],
        overlay: &OverlayList,
    ) -> Result<FrameOutput, TargetError> {
        if self.pipeline.size().is_none() {
            self.resize(camera.viewport)?;
        }
        let list = build_render_list(scene, camera, &mut self.assets);
        let selection: Vec<ObjectId> = selection.iter().map(|id| id.object_id()).collect();
        let output = self.pipeline.execute(
            &list,
            &FrameContext {
                camera,
                selection: &selection,
                overlay,
            },
        )?;
        self.camera = Some(*camera);
        self.stats = FrameStats {
            frame_index: self.pipeline.frame_index(),
            list: list.stats(),
            output: Some(output.clone()),
        };
        Ok(output)
    }

    /// Texture holding the last frame's final image.
    pub fn current_color(&self) -> ColorSource {
        self.pipeline.current_color()
    }

    pub fn read_current_color(&mut self) -> Result<ColorImage, BackendError> {
        self.pipeline.read_color()
    }

    /// Map a display-space cursor to a render-target pixel.
    pub fn to_render_pixel(&self, cursor: Vec2) -> (i64, i64) {
        let render = self.pipeline.size().unwrap_or(self.display_size);
        let display = if self.display_size == UVec2::ZERO {
            render
        } else {
            self.display_size
        };
        let scale = render.as_vec2() / display.max(UVec2::ONE).as_vec2();
        let p = (cursor * scale).floor();
        (p.x as i64, p.y as i64)
    }

    pub fn object_id_at(&mut self, cursor: Vec2) -> ObjectId {
        let (x, y) = self.to_render_pixel(cursor);
        picking::object_id_at(&mut self.pipeline, x, y)
    }

    pub fn entity_at(&mut self, cursor: Vec2) -> Option<EntityId> {
        self.object_id_at(cursor).entity()
    }

    /// Fat pick with the configured radius.
    pub fn object_id_at_fat(&mut self, cursor: Vec2) -> Option<EntityId> {
        let (x, y) = self.to_render_pixel(cursor);
        let radius = self.pipeline.config().pick_radius;
        picking::object_id_at_fat(&mut self.pipeline, x, y, radius)
    }

    pub fn object_ids_in_rect(&mut self, a: Vec2, b: Vec2) -> Vec<EntityId> {
        let a = self.to_render_pixel(a);
        let b = self.to_render_pixel(b);
        picking::object_ids_in_rect(&mut self.pipeline, a, b)
    }

    /// World point under the cursor, using the camera of the last frame.
    pub fn world_position_at(&mut self, cursor: Vec2) -> Option<Vec3> {
        let camera = self.camera?;
        let (x, y) = self.to_render_pixel(cursor);
        picking::world_position_at(&mut self.pipeline, &camera, x, y)
    }
}
