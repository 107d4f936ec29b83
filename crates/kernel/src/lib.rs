//! Scene kernel: the authoritative entity graph the viewport renders and edits.
//!
//! # Invariants
//! - Entity ids are never `0` or `u32::MAX` (both are reserved by the
//!   object-id buffer).
//! - The parent graph is acyclic.
//! - All state mutations flow through explicit operations and are logged.

pub mod world;

pub use world::{EntityData, SceneError, World, WorldEvent};
