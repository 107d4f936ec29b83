use glam::{UVec2, Vec3};
use stagehand_common::CameraParams;

/// Editor fly camera: position, yaw and pitch driven by WASD + mouse look.
/// Produces immutable [`CameraParams`] for the frame, gizmo and picking.
#[derive(Debug, Clone, PartialEq)]
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub speed: f32,
    pub sensitivity: f32,
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 6.0, 12.0),
            yaw: -90.0_f32.to_radians(),
            pitch: -25.0_f32.to_radians(),
            fov: 60.0_f32.to_radians(),
            near: 0.1,
            far: 500.0,
            speed: 8.0,
            sensitivity: 0.003,
        }
    }
}

impl FlyCamera {
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    /// Move in camera space: `x` right, `y` world up, `z` forward.
    pub fn translate(&mut self, local: Vec3, dt: f32) {
        let step = self.speed * dt;
        self.position += self.right() * local.x * step;
        self.position += Vec3::Y * local.y * step;
        self.position += self.forward() * local.z * step;
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * self.sensitivity;
        self.pitch -= dy * self.sensitivity;
        self.pitch = self.pitch.clamp(-89.0_f32.to_radians(), 89.0_f32.to_radians());
    }

    /// Back away from `target` along the current view direction until a
    /// sphere of `radius` fills the vertical field of view.
    pub fn focus(&mut self, target: Vec3, radius: f32) {
        let half = (self.fov * 0.5).max(1e-3);
        let distance = (radius.max(0.1) / half.sin()).max(self.near * 2.0);
        self.position = target - self.forward() * distance;
    }

    /// Camera parameters for a viewport of `viewport` pixels.
    pub fn to_params(&self, viewport: UVec2) -> CameraParams {
        CameraParams::look_at(
            self.position,
            self.position + self.forward(),
            Vec3::Y,
            self.fov,
            self.near,
            self.far,
            viewport,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_looks_down_at_origin() {
        let cam = FlyCamera::default();
        assert!(cam.position.y > 0.0);
        assert!(cam.forward().y < 0.0);
        let params = cam.to_params(UVec2::new(800, 600));
        assert!(params.view_projection().is_finite());
        assert!((params.aspect() - 800.0 / 600.0).abs() < 1e-6);
    }

    #[test]
    fn translate_moves_along_forward() {
        let mut cam = FlyCamera::default();
        let start = cam.position;
        cam.translate(Vec3::Z, 1.0);
        let moved = cam.position - start;
        assert!((moved.length() - cam.speed).abs() < 1e-4);
        assert!(moved.normalize().dot(cam.forward()) > 0.999);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut cam = FlyCamera::default();
        cam.rotate(0.0, -1.0e6);
        assert!(cam.pitch <= 89.0_f32.to_radians() + 1e-6);
    }

    #[test]
    fn focus_keeps_target_in_view() {
        let mut cam = FlyCamera::default();
        let target = Vec3::new(3.0, 0.0, -2.0);
        cam.focus(target, 1.0);
        let params = cam.to_params(UVec2::new(640, 480));
        let pixel = params.world_to_pixel(target).unwrap();
        assert!((pixel.x - 320.0).abs() < 1.0);
        assert!((pixel.y - 240.0).abs() < 1.0);
    }
}
