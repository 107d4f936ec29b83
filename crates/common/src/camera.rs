use glam::{Mat4, UVec2, Vec2, Vec3, Vec4Swizzles};

use crate::geometry::{Frustum, Ray};

/// Immutable snapshot of the camera for one frame.
///
/// Culling, picking and the gizmo all take this by reference instead of
/// reading renderer state, so the geometry can be exercised in isolation.
/// Depth follows the `[0, 1]` convention of `Mat4::perspective_rh`, with 1.0
/// at the far plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    pub view: Mat4,
    pub projection: Mat4,
    /// Camera position in world space.
    pub position: Vec3,
    /// Unit view direction in world space.
    pub forward: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Viewport size in pixels.
    pub viewport: UVec2,
}

impl CameraParams {
    /// Right-handed perspective camera looking from `eye` at `target`.
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        near: f32,
        far: f32,
        viewport: UVec2,
    ) -> Self {
        let viewport = viewport.max(UVec2::ONE);
        let aspect = viewport.x as f32 / viewport.y as f32;
        let forward = (target - eye).try_normalize().unwrap_or(Vec3::NEG_Z);
        Self {
            view: Mat4::look_at_rh(eye, target, up),
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
            position: eye,
            forward,
            fov_y,
            near,
            far,
            viewport,
        }
    }

    pub fn aspect(&self) -> f32 {
        self.viewport.x.max(1) as f32 / self.viewport.y.max(1) as f32
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    pub fn inverse_view_projection(&self) -> Mat4 {
        self.view_projection().inverse()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(self.view_projection())
    }

    /// Convert a cursor position (pixels, top-left origin) to NDC.
    pub fn pixel_to_ndc(&self, pixel: Vec2) -> Vec2 {
        let size = self.viewport.max(UVec2::ONE).as_vec2();
        Vec2::new(
            pixel.x / size.x * 2.0 - 1.0,
            1.0 - pixel.y / size.y * 2.0,
        )
    }

    /// World-space point for an NDC position and `[0, 1]` depth.
    pub fn unproject(&self, ndc: Vec2, depth: f32) -> Option<Vec3> {
        let p = self.inverse_view_projection() * ndc.extend(depth).extend(1.0);
        if p.w.abs() <= f32::EPSILON {
            return None;
        }
        let world = p.xyz() / p.w;
        world.is_finite().then_some(world)
    }

    /// Ray from the camera through a cursor position in pixels.
    pub fn ray_from_pixel(&self, pixel: Vec2) -> Option<Ray> {
        let ndc = self.pixel_to_ndc(pixel);
        let near = self.unproject(ndc, 0.0)?;
        let far = self.unproject(ndc, 1.0)?;
        Ray::new(near, far - near)
    }

    /// Project a world point to pixel coordinates; `None` if it is behind the
    /// camera.
    pub fn world_to_pixel(&self, world: Vec3) -> Option<Vec2> {
        let clip = self.view_projection() * world.extend(1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.xy() / clip.w;
        let size = self.viewport.as_vec2();
        Some(Vec2::new(
            (ndc.x + 1.0) * 0.5 * size.x,
            (1.0 - ndc.y) * 0.5 * size.y,
        ))
    }

    /// Distance of `world` along the view direction.
    pub fn depth_along_view(&self, world: Vec3) -> f32 {
        (world - self.position).dot(self.forward)
    }

    /// World length that covers `pixels` on screen at the given view depth:
    /// `pixels / viewport_height * 2 * depth * tan(fov_y / 2)`.
    pub fn pixels_to_world(&self, pixels: f32, depth: f32) -> f32 {
        let height = self.viewport.y.max(1) as f32;
        pixels / height * 2.0 * depth.max(self.near) * (self.fov_y * 0.5).tan()
    }
}
