//! Developer tooling: read-only scene and frame inspection for panels and
//! command-line reports, plus the demo scene both binaries open with.
//!
//! # Invariants
//! - Inspection never mutates the scene.

pub mod demo;
mod inspector;

pub use inspector::{EntityInfo, FrameReport, SceneInspector, SceneSummary};
