//! Ray, plane and frustum math shared by culling, picking and the gizmo.
//!
//! Every function that can hit a degenerate configuration (parallel lines,
//! a ray parallel to a plane, zero-length directions) returns `None` instead
//! of producing NaN.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Anything below this is treated as zero length / parallel.
pub const GEOMETRY_EPSILON: f32 = 1e-6;

/// A half-line with a unit-length direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Build a ray; returns `None` for a zero-length direction.
    pub fn new(origin: Vec3, direction: Vec3) -> Option<Self> {
        let direction = direction.try_normalize()?;
        Some(Self { origin, direction })
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Plane in Hessian normal form: `dot(normal, p) + d = 0`, with unit normal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Option<Self> {
        let normal = normal.try_normalize()?;
        Some(Self {
            normal,
            d: -normal.dot(point),
        })
    }

    /// Normalize raw `(a, b, c, d)` coefficients as extracted from a matrix.
    fn from_coefficients(v: Vec4) -> Self {
        let len = v.truncate().length();
        if len <= GEOMETRY_EPSILON {
            return Self {
                normal: Vec3::ZERO,
                d: 0.0,
            };
        }
        Self {
            normal: v.truncate() / len,
            d: v.w / len,
        }
    }

    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }

    /// Ray parameter of the intersection, or `None` when the ray is parallel
    /// to the plane or the hit lies behind the origin.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<f32> {
        let denom = self.normal.dot(ray.direction);
        if denom.abs() <= GEOMETRY_EPSILON {
            return None;
        }
        let t = -self.signed_distance(ray.origin) / denom;
        (t >= 0.0 && t.is_finite()).then_some(t)
    }

    pub fn intersect_point(&self, ray: &Ray) -> Option<Vec3> {
        self.intersect_ray(ray).map(|t| ray.at(t))
    }
}

/// The six planes of a view frustum, normals pointing inward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract planes from a view-projection matrix with a `[0, 1]` depth
    /// range (the `glam::Mat4::perspective_rh` convention).
    pub fn from_view_projection(m: Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        Self {
            planes: [
                Plane::from_coefficients(r3 + r0),
                Plane::from_coefficients(r3 - r0),
                Plane::from_coefficients(r3 + r1),
                Plane::from_coefficients(r3 - r1),
                Plane::from_coefficients(r2),
                Plane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// Conservative sphere test: the sphere survives unless it lies entirely
    /// on the outside of at least one plane.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| p.signed_distance(center) >= -radius)
    }

    /// True when the sphere is completely inside all six planes.
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| p.signed_distance(center) >= radius)
    }
}

/// Parameter `t` of the point on the line `origin + t * dir` closest to the
/// ray. `None` when the ray and line are (nearly) parallel or `dir` is zero.
pub fn closest_line_parameter(ray: &Ray, origin: Vec3, dir: Vec3) -> Option<f32> {
    let dir = dir.try_normalize()?;
    let w0 = origin - ray.origin;
    let b = dir.dot(ray.direction);
    let denom = 1.0 - b * b;
    if denom.abs() <= GEOMETRY_EPSILON {
        return None;
    }
    let d = dir.dot(w0);
    let e = ray.direction.dot(w0);
    let t = (b * e - d) / denom;
    t.is_finite().then_some(t)
}

/// Shortest distance between a ray and the segment `a..b`, together with the
/// ray parameter at the closest approach.
pub fn ray_segment_distance(ray: &Ray, a: Vec3, b: Vec3) -> (f32, f32) {
    let seg = b - a;
    let seg_len2 = seg.length_squared();
    let w0 = ray.origin - a;
    let d_dot_s = ray.direction.dot(seg);
    let denom = seg_len2 - d_dot_s * d_dot_s;

    // Segment parameter in [0, 1], ray parameter >= 0.
    let mut s = if seg_len2 <= GEOMETRY_EPSILON || denom.abs() <= GEOMETRY_EPSILON {
        0.0
    } else {
        let e = ray.direction.dot(w0);
        let f = seg.dot(w0);
        ((f - d_dot_s * e) / denom).clamp(0.0, 1.0)
    };
    let mut t = (a + seg * s - ray.origin).dot(ray.direction);
    if t < 0.0 {
        t = 0.0;
        if seg_len2 > GEOMETRY_EPSILON {
            s = ((ray.origin - a).dot(seg) / seg_len2).clamp(0.0, 1.0);
        }
    }
    let dist = (ray.at(t) - (a + seg * s)).length();
    (dist, t)
}

/// Nearest non-negative ray parameter where the ray enters the sphere.
pub fn ray_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<f32> {
    let oc = ray.origin - center;
    let b = oc.dot(ray.direction);
    let c = oc.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    let t0 = -b - sq;
    let t1 = -b + sq;
    if t0 >= 0.0 {
        Some(t0)
    } else if t1 >= 0.0 {
        Some(0.0)
    } else {
        None
    }
}

/// Two unit vectors orthogonal to `axis` and to each other, forming a
/// right-handed basis `(u, v, axis)`.
pub fn orthonormal_basis(axis: Vec3) -> Option<(Vec3, Vec3)> {
    let axis = axis.try_normalize()?;
    let u = axis.any_orthonormal_vector();
    let v = axis.cross(u);
    Some((u, v))
}

/// Wrap an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let mut a = (angle + PI).rem_euclid(TAU) - PI;
    if a <= -PI {
        a += TAU;
    }
    a
}

/// Quantize `value` to a multiple of `step`; non-positive steps leave it
/// unchanged.
pub fn snap(value: f32, step: f32) -> f32 {
    if step > 0.0 && step.is_finite() {
        (value / step).round() * step
    } else {
        value
    }
}

/// Snap configuration: one switch, independent step sizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapSettings {
    pub enabled: bool,
    pub move_step: f32,
    /// Radians.
    pub angle_step: f32,
    pub scale_step: f32,
}

impl Default for SnapSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            move_step: 0.5,
            angle_step: 15f32.to_radians(),
            scale_step: 0.1,
        }
    }
}

impl SnapSettings {
    pub fn snap_move(&self, delta: f32) -> f32 {
        self.apply(delta, self.move_step)
    }

    pub fn snap_angle(&self, delta: f32) -> f32 {
        self.apply(delta, self.angle_step)
    }

    pub fn snap_scale(&self, delta: f32) -> f32 {
        self.apply(delta, self.scale_step)
    }

    fn apply(&self, delta: f32, step: f32) -> f32 {
        if self.enabled { snap(delta, step) } else { delta }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn test_frustum() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
        Frustum::from_view_projection(proj * view)
    }

    #[test]
    fn frustum_keeps_sphere_in_front() {
        let f = test_frustum();
        assert!(f.intersects_sphere(Vec3::ZERO, 0.5));
        assert!(f.contains_sphere(Vec3::ZERO, 0.5));
    }

    #[test]
    fn frustum_rejects_sphere_behind_camera() {
        let f = test_frustum();
        assert!(!f.intersects_sphere(Vec3::new(0.0, 0.0, 20.0), 1.0));
    }

    #[test]
    fn frustum_rejects_beyond_far_plane() {
        let f = test_frustum();
        assert!(!f.intersects_sphere(Vec3::new(0.0, 0.0, -200.0), 1.0));
    }

    #[test]
    fn frustum_keeps_sphere_straddling_side_plane() {
        let f = test_frustum();
        // Half-width at distance 10 with 60 deg fov is ~5.77.
        assert!(f.intersects_sphere(Vec3::new(6.0, 0.0, 0.0), 1.0));
        assert!(!f.intersects_sphere(Vec3::new(20.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn plane_ray_intersection() {
        let plane = Plane::from_point_normal(Vec3::ZERO, Vec3::Y).unwrap();
        let ray = Ray::new(Vec3::new(1.0, 5.0, 0.0), Vec3::NEG_Y).unwrap();
        let hit = plane.intersect_point(&ray).unwrap();
        assert!(hit.abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn plane_parallel_ray_is_none() {
        let plane = Plane::from_point_normal(Vec3::ZERO, Vec3::Y).unwrap();
        let ray = Ray::new(Vec3::new(0.0, 1.0, 0.0), Vec3::X).unwrap();
        assert!(plane.intersect_ray(&ray).is_none());
    }

    #[test]
    fn plane_behind_ray_is_none() {
        let plane = Plane::from_point_normal(Vec3::ZERO, Vec3::Y).unwrap();
        let ray = Ray::new(Vec3::new(0.0, 1.0, 0.0), Vec3::Y).unwrap();
        assert!(plane.intersect_ray(&ray).is_none());
    }

    #[test]
    fn closest_point_on_axis() {
        // Ray straight down through x = 2 hits the X axis line at t = 2.
        let ray = Ray::new(Vec3::new(2.0, 5.0, 0.0), Vec3::NEG_Y).unwrap();
        let t = closest_line_parameter(&ray, Vec3::ZERO, Vec3::X).unwrap();
        assert!((t - 2.0).abs() < 1e-5);
    }

    #[test]
    fn closest_point_parallel_is_none() {
        let ray = Ray::new(Vec3::new(0.0, 1.0, 0.0), Vec3::X).unwrap();
        assert!(closest_line_parameter(&ray, Vec3::ZERO, Vec3::X).is_none());
        assert!(closest_line_parameter(&ray, Vec3::ZERO, Vec3::ZERO).is_none());
    }

    #[test]
    fn segment_distance() {
        let ray = Ray::new(Vec3::new(0.5, 1.0, 5.0), Vec3::NEG_Z).unwrap();
        let (dist, t) = ray_segment_distance(&ray, Vec3::ZERO, Vec3::X);
        assert!((dist - 1.0).abs() < 1e-5);
        assert!((t - 5.0).abs() < 1e-5);
    }

    #[test]
    fn sphere_hit() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z).unwrap();
        let t = ray_sphere(&ray, Vec3::ZERO, 1.0).unwrap();
        assert!((t - 4.0).abs() < 1e-5);
        assert!(ray_sphere(&ray, Vec3::new(3.0, 0.0, 0.0), 1.0).is_none());
    }

    #[test]
    fn wrap_angle_range() {
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(0.25) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn snap_rounds_to_step() {
        assert_eq!(snap(0.78, 0.5), 1.0);
        assert_eq!(snap(0.2, 0.5), 0.0);
        assert_eq!(snap(-0.78, 0.5), -1.0);
        assert_eq!(snap(0.78, 0.0), 0.78);
    }

    #[test]
    fn basis_is_orthonormal() {
        let (u, v) = orthonormal_basis(Vec3::new(0.3, 0.8, -0.2)).unwrap();
        let axis = Vec3::new(0.3, 0.8, -0.2).normalize();
        assert!(u.dot(v).abs() < 1e-5);
        assert!(u.dot(axis).abs() < 1e-5);
        assert!((u.cross(v) - axis).length() < 1e-5);
        assert!(orthonormal_basis(Vec3::ZERO).is_none());
    }

    #[test]
    fn snap_settings_respect_switch() {
        let mut settings = SnapSettings {
            move_step: 0.5,
            ..SnapSettings::default()
        };
        assert_eq!(settings.snap_move(0.78), 0.78);
        settings.enabled = true;
        assert_eq!(settings.snap_move(0.78), 1.0);
        assert!((settings.snap_angle(0.3) - 15f32.to_radians()).abs() < 1e-6);
    }
}
