//! Frame orchestration over a backend.
//!
//! Strict stage order per frame: clear, opaque pass, transparent pass,
//! post-process chain (generic effects, then selection outline, then temporal
//! resolve), overlays into the final target.
//!
//! # Invariants
//! - Targets are reallocated only when the computed render size changes.
//! - No chain stage reads and writes the same texture.
//! - A missing or invalid auxiliary target never aborts the frame; the
//!   pre-post-process color is presented instead.

use glam::{Mat4, UVec2, Vec4};
use stagehand_common::{CameraParams, ObjectId};

use crate::config::{OutlineConfig, PostEffectKind, ViewportConfig};
use crate::overlay::{OverlayLine, OverlayList, wireframe_overlay};
use crate::post::{ChainStage, ColorSource, EffectInitError, PostChain, final_source, stage_io};
use crate::render_list::RenderList;

const WIREFRAME_COLOR: Vec4 = Vec4::new(0.1, 0.9, 0.3, 1.0);

/// Inclusive-exclusive pixel rectangle in render-target coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Rectangle spanning two corners given in any order, both inclusive,
    /// clamped to `size`. `None` when it lies entirely outside.
    pub fn from_corners(a: (i64, i64), b: (i64, i64), size: UVec2) -> Option<Self> {
        let (w, h) = (size.x as i64, size.y as i64);
        let x0 = a.0.min(b.0).max(0);
        let y0 = a.1.min(b.1).max(0);
        let x1 = a.0.max(b.0).min(w - 1);
        let y1 = a.1.max(b.1).min(h - 1);
        if x0 > x1 || y0 > y1 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0 + 1) as u32,
            height: (y1 - y0 + 1) as u32,
        })
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Render-target allocation or validation failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TargetError {
    #[error("{target} target could not be allocated at {size}: {reason}")]
    Allocation {
        target: &'static str,
        size: UVec2,
        reason: String,
    },
    #[error("{target} target is incomplete: {reason}")]
    Invalid {
        target: &'static str,
        reason: String,
    },
    #[error("render targets have not been allocated")]
    NotAllocated,
}

/// Readback failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("render targets have not been allocated")]
    NotAllocated,
    #[error("read outside the {size} target")]
    OutOfBounds { size: UVec2 },
    #[error("readback failed: {0}")]
    Readback(String),
}

/// CPU copy of a color target.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImage {
    pub size: UVec2,
    /// Row-major, top row first.
    pub pixels: Vec<Vec4>,
}

impl ColorImage {
    pub fn get(&self, x: u32, y: u32) -> Option<Vec4> {
        if x >= self.size.x || y >= self.size.y {
            return None;
        }
        self.pixels.get((y * self.size.x + x) as usize).copied()
    }

    /// 8-bit RGBA, clamping HDR values.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|c| {
                let c = c.clamp(Vec4::ZERO, Vec4::ONE) * 255.0;
                [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
            })
            .collect()
    }
}

/// Parameters of the temporal resolve stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalResolve {
    pub inverse_view_projection: Mat4,
    pub previous_view_projection: Mat4,
    /// Weight of the reprojected history.
    pub blend: f32,
}

/// Device-side work the pipeline orchestrates.
pub trait FrameBackend {
    fn max_texture_size(&self) -> u32;

    /// Primary target: HDR color, object id and depth channels.
    fn allocate_primary(&mut self, size: UVec2) -> Result<(), TargetError>;

    /// Auxiliary or history color target.
    fn allocate_color(&mut self, target: ColorSource, size: UVec2) -> Result<(), TargetError>;

    fn release_color(&mut self, target: ColorSource);

    /// Check that `target` exists and is complete at `size`.
    fn validate_color(&self, target: ColorSource, size: UVec2) -> Result<(), TargetError>;

    fn init_effect(&mut self, effect: &PostEffectKind) -> Result<(), EffectInitError>;

    /// Color to `color`, id to 0, depth to 1.0.
    fn clear(&mut self, color: Vec4);

    /// Color, id and depth, with depth test and write.
    fn draw_opaque(&mut self, items: &[crate::RenderItem], camera: &CameraParams);

    /// Color only, depth-tested without depth write, in the given order.
    fn draw_transparent(&mut self, items: &[crate::RenderItem], camera: &CameraParams);

    fn copy_color(&mut self, src: ColorSource, dst: ColorSource);

    fn apply_effect(&mut self, effect: &PostEffectKind, src: ColorSource, dst: ColorSource);

    /// Edge detection on the id channel around `selection`.
    fn outline(
        &mut self,
        selection: &[ObjectId],
        style: &OutlineConfig,
        src: ColorSource,
        dst: ColorSource,
    );

    /// Blend `src` with the history target reprojected through the previous
    /// view-projection.
    fn temporal_resolve(&mut self, src: ColorSource, dst: ColorSource, resolve: &TemporalResolve);

    /// Lines drawn on top of `target`, without depth test.
    fn draw_overlay(&mut self, lines: &[OverlayLine], camera: &CameraParams, target: ColorSource);

    /// Object ids of `rect`, row-major.
    fn read_ids(&mut self, rect: PixelRect) -> Result<Vec<u32>, BackendError>;

    fn read_depth(&mut self, x: u32, y: u32) -> Result<f32, BackendError>;

    fn read_color(&mut self, source: ColorSource) -> Result<ColorImage, BackendError>;
}

/// Health flags of the frame targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetHealth {
    pub primary: bool,
    pub aux: [bool; 2],
    pub history: bool,
}

impl TargetHealth {
    pub fn aux_healthy(&self) -> bool {
        self.aux[0] && self.aux[1]
    }
}

/// Per-frame inputs besides the render list.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub camera: &'a CameraParams,
    pub selection: &'a [ObjectId],
    pub overlay: &'a OverlayList,
}

/// What a frame produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub color: ColorSource,
    pub size: UVec2,
    pub stages_run: usize,
    pub fallback_used: bool,
    pub temporal_applied: bool,
    /// Effects disabled because their initialization failed.
    pub skipped_effects: Vec<&'static str>,
    pub items_drawn: usize,
}

/// Render size for a display size: scaled, clamped to `[2, max]` and rounded
/// down to even dimensions.
pub fn render_size(display: UVec2, scale: f32, max_texture_size: u32) -> UVec2 {
    let max = max_texture_size.max(2);
    let dim = |d: u32| {
        let scaled = (d as f32 * scale).round();
        let scaled = if scaled.is_finite() { scaled as u32 } else { 2 };
        scaled.clamp(2, max) & !1
    };
    UVec2::new(dim(display.x), dim(display.y))
}

/// Multi-target frame pipeline.
#[derive(Debug)]
pub struct FramePipeline<B> {
    backend: B,
    config: ViewportConfig,
    chain: PostChain,
    size: Option<UVec2>,
    health: TargetHealth,
    history_valid: bool,
    previous_view_projection: Option<Mat4>,
    current: ColorSource,
    frame_index: u64,
}

impl<B: FrameBackend> FramePipeline<B> {
    pub fn new(mut backend: B, config: ViewportConfig) -> Self {
        let chain = PostChain::init(&config.post_effects, |kind| backend.init_effect(kind));
        Self {
            backend,
            config,
            chain,
            size: None,
            health: TargetHealth::default(),
            history_valid: false,
            previous_view_projection: None,
            current: ColorSource::Primary,
            frame_index: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    pub fn chain(&self) -> &PostChain {
        &self.chain
    }

    pub fn health(&self) -> TargetHealth {
        self.health
    }

    /// Current render size, `None` before the first successful resize.
    pub fn size(&self) -> Option<UVec2> {
        self.size
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Texture holding the last completed frame's image. Stable until the
    /// next `execute`.
    pub fn current_color(&self) -> ColorSource {
        self.current
    }

    /// Replace the configuration. Effects are re-initialized when the chain
    /// changed; targets follow the new render scale on the next resize.
    pub fn set_config(&mut self, config: ViewportConfig) {
        if config.post_effects != self.config.post_effects {
            let backend = &mut self.backend;
            self.chain = PostChain::init(&config.post_effects, |kind| backend.init_effect(kind));
        }
        let temporal_changed = config.temporal.enabled != self.config.temporal.enabled;
        self.config = config;
        if temporal_changed {
            if let Some(size) = self.size {
                self.allocate_history(size);
            }
        }
    }

    /// Recompute the render size for `display_size` and reallocate targets if
    /// it changed. Returns whether a reallocation happened.
    pub fn resize(&mut self, display_size: UVec2) -> Result<bool, TargetError> {
        let size = render_size(
            display_size,
            self.config.render_scale,
            self.backend.max_texture_size(),
        );
        if self.size == Some(size) {
            return Ok(false);
        }
        tracing::debug!(%size, display = %display_size, "allocating frame targets");

        if let Err(err) = self.backend.allocate_primary(size) {
            self.size = None;
            self.health = TargetHealth::default();
            return Err(err);
        }
        self.size = Some(size);
        self.health.primary = true;
        for (slot, target) in [ColorSource::AuxA, ColorSource::AuxB].into_iter().enumerate() {
            self.health.aux[slot] = match self.backend.allocate_color(target, size) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(%err, "auxiliary target unavailable, post-processing disabled");
                    false
                }
            };
        }
        self.allocate_history(size);
        self.current = ColorSource::Primary;
        Ok(true)
    }

    fn allocate_history(&mut self, size: UVec2) {
        self.history_valid = false;
        if !self.config.temporal.enabled {
            if self.health.history {
                self.backend.release_color(ColorSource::History);
            }
            self.health.history = false;
            return;
        }
        self.health.history = match self.backend.allocate_color(ColorSource::History, size) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, "history target unavailable, temporal resolve disabled");
                false
            }
        };
    }

    fn validate_targets(&mut self, size: UVec2) {
        for (slot, target) in [ColorSource::AuxA, ColorSource::AuxB].into_iter().enumerate() {
            if !self.health.aux[slot] {
                continue;
            }
            if let Err(err) = self.backend.validate_color(target, size) {
                tracing::warn!(%err, "auxiliary target marked unhealthy");
                self.health.aux[slot] = false;
            }
        }
        if self.health.history {
            if let Err(err) = self.backend.validate_color(ColorSource::History, size) {
                tracing::warn!(%err, "history target marked unhealthy");
                self.health.history = false;
                self.history_valid = false;
            }
        }
    }

    /// Run one frame.
    pub fn execute(
        &mut self,
        list: &RenderList,
        frame: &FrameContext<'_>,
    ) -> Result<FrameOutput, TargetError> {
        let size = self.size.ok_or(TargetError::NotAllocated)?;
        let _span = tracing::info_span!("frame", index = self.frame_index).entered();
        let camera = frame.camera;
        self.validate_targets(size);

        self.backend.clear(self.config.clear_color);
        self.backend.draw_opaque(list.opaque(), camera);
        self.backend.draw_transparent(list.transparent(), camera);

        let mut stages_run = 0;
        let mut temporal_applied = false;
        let fallback_used = !self.health.aux_healthy();
        let color = if fallback_used {
            ColorSource::Primary
        } else {
            let outline = self.config.outline.enabled && !frame.selection.is_empty();
            let temporal = self.health.history && self.history_valid;
            let previous = self.previous_view_projection.unwrap_or(camera.view_projection());
            let stages = self.chain.plan(outline, temporal && self.config.temporal.enabled);

            if stages.is_empty() {
                self.backend.copy_color(ColorSource::Primary, ColorSource::AuxA);
            }
            for (i, stage) in stages.iter().enumerate() {
                let (src, dst) = stage_io(i);
                match *stage {
                    ChainStage::Effect(index) => {
                        if let Some(effect) = self.chain.effect(index) {
                            self.backend.apply_effect(&effect.kind, src, dst);
                        }
                    }
                    ChainStage::Outline => {
                        self.backend
                            .outline(frame.selection, &self.config.outline, src, dst);
                    }
                    ChainStage::Temporal => {
                        let resolve = TemporalResolve {
                            inverse_view_projection: camera.inverse_view_projection(),
                            previous_view_projection: previous,
                            blend: self.config.temporal.blend,
                        };
                        self.backend.temporal_resolve(src, dst, &resolve);
                        temporal_applied = true;
                    }
                }
            }
            stages_run = stages.len();
            let color = final_source(stages_run);

            if self.health.history {
                self.backend.copy_color(color, ColorSource::History);
                self.history_valid = true;
            }
            color
        };

        let mut lines: Vec<OverlayLine> = Vec::new();
        if self.config.wireframe {
            lines.extend_from_slice(wireframe_overlay(list.items(), WIREFRAME_COLOR).lines());
        }
        lines.extend_from_slice(frame.overlay.lines());
        if !lines.is_empty() {
            self.backend.draw_overlay(&lines, camera, color);
        }

        self.previous_view_projection = Some(camera.view_projection());
        self.current = color;
        self.frame_index += 1;

        let output = FrameOutput {
            color,
            size,
            stages_run,
            fallback_used,
            temporal_applied,
            skipped_effects: self.chain.failed(),
            items_drawn: list.len(),
        };
        tracing::trace!(
            color = color.name(),
            stages = stages_run,
            fallback = fallback_used,
            "frame complete"
        );
        Ok(output)
    }

    pub fn read_color(&mut self) -> Result<ColorImage, BackendError> {
        if self.size.is_none() {
            return Err(BackendError::NotAllocated);
        }
        self.backend.read_color(self.current)
    }

    pub(crate) fn read_ids(&mut self, rect: PixelRect) -> Result<Vec<u32>, BackendError> {
        if self.size.is_none() {
            return Err(BackendError::NotAllocated);
        }
        self.backend.read_ids(rect)
    }

    pub(crate) fn read_depth(&mut self, x: u32, y: u32) -> Result<f32, BackendError> {
        if self.size.is_none() {
            return Err(BackendError::NotAllocated);
        }
        self.backend.read_depth(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_size_scaled_and_even() {
        assert_eq!(render_size(UVec2::new(801, 601), 1.0, 8192), UVec2::new(800, 600));
        assert_eq!(render_size(UVec2::new(1000, 500), 0.5, 8192), UVec2::new(500, 250));
        assert_eq!(render_size(UVec2::new(1000, 500), 0.51, 8192), UVec2::new(510, 254));
    }

    #[test]
    fn render_size_clamped() {
        assert_eq!(render_size(UVec2::new(0, 1), 1.0, 8192), UVec2::new(2, 2));
        assert_eq!(render_size(UVec2::new(10000, 100), 1.0, 4095), UVec2::new(4094, 100));
        assert_eq!(render_size(UVec2::new(100, 100), f32::NAN, 4096), UVec2::new(2, 2));
    }

    #[test]
    fn rect_from_any_corner_order() {
        let size = UVec2::new(10, 10);
        let a = PixelRect::from_corners((7, 2), (3, 5), size).unwrap();
        let b = PixelRect::from_corners((3, 5), (7, 2), size).unwrap();
        assert_eq!(a, b);
        assert_eq!((a.x, a.y, a.width, a.height), (3, 2, 5, 4));
    }

    #[test]
    fn rect_clamped_to_surface() {
        let size = UVec2::new(10, 10);
        let r = PixelRect::from_corners((-5, -5), (20, 3), size).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (0, 0, 10, 4));
        assert!(PixelRect::from_corners((11, 0), (20, 3), size).is_none());
    }

    #[test]
    fn color_image_to_rgba8_clamps() {
        let image = ColorImage {
            size: UVec2::new(1, 1),
            pixels: vec![Vec4::new(2.0, 0.5, -1.0, 1.0)],
        };
        assert_eq!(image.to_rgba8(), vec![255, 127, 0, 255]);
        assert!(image.get(1, 0).is_none());
    }
}
