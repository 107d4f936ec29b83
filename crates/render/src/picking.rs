//! Object picking over the id and depth channels of the last frame.
//!
//! Reads never trigger a render, so repeated picks at the same pixel return
//! the same answer until the next frame completes. Out-of-bounds or failed
//! reads count as "no hit".

use glam::{UVec2, Vec2, Vec3};
use stagehand_common::{CameraParams, EntityId, ObjectId};

use crate::pipeline::{BackendError, FrameBackend, FramePipeline, PixelRect};

/// Depth at or beyond this value is the cleared far plane.
pub const FAR_DEPTH: f32 = 1.0;

/// Readable id and depth channels.
pub trait PickSurface {
    fn surface_size(&self) -> Option<UVec2>;

    /// Ids inside `rect`, row-major.
    fn read_id_rect(&mut self, rect: PixelRect) -> Result<Vec<u32>, BackendError>;

    fn read_depth_at(&mut self, x: u32, y: u32) -> Result<f32, BackendError>;
}

impl<B: FrameBackend> PickSurface for FramePipeline<B> {
    fn surface_size(&self) -> Option<UVec2> {
        self.size()
    }

    fn read_id_rect(&mut self, rect: PixelRect) -> Result<Vec<u32>, BackendError> {
        self.read_ids(rect)
    }

    fn read_depth_at(&mut self, x: u32, y: u32) -> Result<f32, BackendError> {
        self.read_depth(x, y)
    }
}

fn in_bounds(size: UVec2, x: i64, y: i64) -> bool {
    x >= 0 && y >= 0 && x < size.x as i64 && y < size.y as i64
}

/// Raw id-channel value at a pixel; `ObjectId::NONE` when out of bounds or
/// unreadable.
pub fn object_id_at<S: PickSurface + ?Sized>(surface: &mut S, x: i64, y: i64) -> ObjectId {
    let Some(size) = surface.surface_size() else {
        return ObjectId::NONE;
    };
    if !in_bounds(size, x, y) {
        return ObjectId::NONE;
    }
    let rect = PixelRect {
        x: x as u32,
        y: y as u32,
        width: 1,
        height: 1,
    };
    match surface.read_id_rect(rect) {
        Ok(ids) => ids.first().copied().map_or(ObjectId::NONE, ObjectId),
        Err(err) => {
            tracing::debug!(%err, "point pick failed");
            ObjectId::NONE
        }
    }
}

/// Entity under a pixel; background and the gizmo sentinel are no entity.
pub fn entity_at<S: PickSurface + ?Sized>(surface: &mut S, x: i64, y: i64) -> Option<EntityId> {
    object_id_at(surface, x, y).entity()
}

/// Most frequent entity in the `(2r + 1)^2` neighborhood of a pixel. Ties go
/// to the id seen first in row-major order.
pub fn object_id_at_fat<S: PickSurface + ?Sized>(
    surface: &mut S,
    x: i64,
    y: i64,
    radius: u32,
) -> Option<EntityId> {
    let size = surface.surface_size()?;
    if !in_bounds(size, x, y) {
        return None;
    }
    let r = radius as i64;
    let rect = PixelRect::from_corners((x - r, y - r), (x + r, y + r), size)?;
    let ids = surface.read_id_rect(rect).ok()?;

    // (id, count) in first-seen order.
    let mut tally: Vec<(EntityId, u32)> = Vec::new();
    for raw in ids {
        let Some(entity) = ObjectId(raw).entity() else {
            continue;
        };
        match tally.iter_mut().find(|(id, _)| *id == entity) {
            Some((_, count)) => *count += 1,
            None => tally.push((entity, 1)),
        }
    }
    let best = tally.iter().map(|(_, c)| *c).max()?;
    tally
        .into_iter()
        .find(|(_, count)| *count == best)
        .map(|(id, _)| id)
}

/// Distinct entities inside the rectangle spanned by two corners, in
/// first-appearance order.
pub fn object_ids_in_rect<S: PickSurface + ?Sized>(
    surface: &mut S,
    a: (i64, i64),
    b: (i64, i64),
) -> Vec<EntityId> {
    let Some(size) = surface.surface_size() else {
        return Vec::new();
    };
    let Some(rect) = PixelRect::from_corners(a, b, size) else {
        return Vec::new();
    };
    let Ok(ids) = surface.read_id_rect(rect) else {
        return Vec::new();
    };
    let mut out: Vec<EntityId> = Vec::new();
    for raw in ids {
        if let Some(entity) = ObjectId(raw).entity() {
            if !out.contains(&entity) {
                out.push(entity);
            }
        }
    }
    out
}

/// World-space point under a pixel, unprojected from the depth channel.
/// `None` on background (far depth) or out of bounds.
pub fn world_position_at<S: PickSurface + ?Sized>(
    surface: &mut S,
    camera: &CameraParams,
    x: i64,
    y: i64,
) -> Option<Vec3> {
    let size = surface.surface_size()?;
    if !in_bounds(size, x, y) {
        return None;
    }
    let depth = surface.read_depth_at(x as u32, y as u32).ok()?;
    if depth >= FAR_DEPTH || !depth.is_finite() {
        return None;
    }
    // Sample at the pixel centre, mapped through the surface size so a
    // scaled render target still lines up with the camera.
    let ndc = Vec2::new(
        (x as f32 + 0.5) / size.x as f32 * 2.0 - 1.0,
        1.0 - (y as f32 + 0.5) / size.y as f32 * 2.0,
    );
    camera.unproject(ndc, depth)
}
