//! Viewport rendering: per-frame render-list construction, frame pipeline
//! orchestration and picking.
//!
//! # Invariants
//! - The renderer reads the scene and never mutates it.
//! - Object id 0 is background and `u32::MAX` is the gizmo sentinel; every
//!   other id in the id channel is a live entity.
//! - The exposed current color always names a healthy target: the final
//!   chain target, or the primary color when post-processing is unavailable.
//!
//! The pipeline drives a `FrameBackend`. `SoftwareBackend` is the CPU
//! reference used for headless output and tests; the wgpu backend lives in
//! `stagehand-render-wgpu` and implements the same trait.

mod config;
mod overlay;
mod picking;
mod pipeline;
mod post;
mod render_list;
mod software;
mod viewport;

pub use config::{
    ConfigError, GizmoConfig, OutlineConfig, PostEffectDesc, PostEffectKind, TemporalConfig,
    ViewportConfig,
};
pub use overlay::{OverlayLine, OverlayList, wireframe_overlay};
pub use picking::{
    FAR_DEPTH, PickSurface, entity_at, object_id_at, object_id_at_fat, object_ids_in_rect,
    world_position_at,
};
pub use pipeline::{
    BackendError, ColorImage, FrameBackend, FrameContext, FrameOutput, FramePipeline, PixelRect,
    TargetError, TargetHealth, TemporalResolve, render_size,
};
pub use post::{
    ChainStage, ColorSource, EffectInitError, PostChain, PostEffect, final_source, stage_io,
};
pub use render_list::{
    RenderAssets, RenderItem, RenderList, RenderListStats, build_render_list, is_culled,
};
pub use software::{SoftwareBackend, SoftwareFaults};
pub use viewport::{FrameStats, Viewport};
