//! Shared types for the viewport crates: entity and object ids, transforms,
//! the immutable camera value object, and the ray / plane / frustum math used
//! by culling, picking and the gizmo.

pub mod camera;
pub mod geometry;
mod types;

pub use camera::CameraParams;
pub use geometry::{Frustum, Plane, Ray, SnapSettings};
pub use types::{EntityId, IdError, ObjectId, Transform};
