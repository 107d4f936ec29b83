//! wgpu frame backend for the stagehand viewport.
//!
//! Implements `FrameBackend` on top of a device and queue owned by the
//! embedding application. The primary target carries HDR color
//! (`Rgba16Float`), object ids (`R32Uint`) and depth (`Depth32Float`); the
//! auxiliary and history targets are HDR color only.
//!
//! # Invariants
//! - Overlay lines never touch the id or depth channels.
//! - Readbacks block on the device and are only issued from pick calls.
//! - Camera motion lives outside the scene and never produces edits.

mod camera;
mod gpu;
mod readback;
mod shaders;

pub use camera::FlyCamera;
pub use gpu::WgpuBackend;
