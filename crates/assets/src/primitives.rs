use glam::Vec3;
use std::collections::HashMap;
use std::f32::consts::TAU;
use stagehand_ecs::MeshKind;

use crate::mesh::{GeometryHandle, GeometrySlot, MeshData, MeshVertex};

/// Culling radius for custom meshes whose exact bounds are not yet known.
pub const DEFAULT_CUSTOM_RADIUS: f32 = 1.0;

const RADIAL_SEGMENTS: u32 = 24;
const SPHERE_RINGS: u32 = 12;

/// Table entry for one mesh kind.
#[derive(Debug, Clone)]
pub struct GeometryDescriptor {
    /// Bounding-sphere radius at unit scale.
    pub base_radius: f32,
    pub geometry: GeometryHandle,
}

impl GeometryDescriptor {
    pub fn from_mesh(kind: MeshKind, data: MeshData) -> Self {
        let geometry = GeometryHandle::new(GeometrySlot::Primitive(kind), data);
        Self {
            base_radius: geometry.bounding_radius,
            geometry,
        }
    }
}

/// Mesh kind → built-in geometry. New kinds are added with `register`,
/// call sites only ever look kinds up.
#[derive(Debug, Clone)]
pub struct PrimitiveLibrary {
    table: HashMap<MeshKind, GeometryDescriptor>,
    fallback: GeometryDescriptor,
}

impl Default for PrimitiveLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimitiveLibrary {
    /// Library pre-populated with the procedural primitives.
    pub fn new() -> Self {
        let fallback = GeometryDescriptor::from_mesh(MeshKind::Cube, cube());
        let mut library = Self {
            table: HashMap::new(),
            fallback: fallback.clone(),
        };
        library.table.insert(MeshKind::Cube, fallback);
        library.register(MeshKind::Sphere, sphere(SPHERE_RINGS, RADIAL_SEGMENTS));
        library.register(MeshKind::Plane, plane());
        library.register(MeshKind::Cylinder, cylinder(RADIAL_SEGMENTS));
        library.register(MeshKind::Cone, cone(RADIAL_SEGMENTS));
        library
    }

    /// Add or replace the geometry for `kind`.
    pub fn register(&mut self, kind: MeshKind, data: MeshData) {
        self.table
            .insert(kind, GeometryDescriptor::from_mesh(kind, data));
    }

    pub fn descriptor(&self, kind: MeshKind) -> Option<&GeometryDescriptor> {
        self.table.get(&kind)
    }

    /// The cube, used whenever a geometry cannot be produced.
    pub fn fallback(&self) -> &GeometryDescriptor {
        &self.fallback
    }

    /// Culling radius at unit scale. Kinds with no table entry use
    /// `DEFAULT_CUSTOM_RADIUS`.
    pub fn base_radius(&self, kind: MeshKind) -> f32 {
        self.table
            .get(&kind)
            .map_or(DEFAULT_CUSTOM_RADIUS, |d| d.base_radius)
    }
}

/// Unit cube centered at the origin.
fn cube() -> MeshData {
    let p = 0.5_f32;
    let faces: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
    ];
    let mut mesh = MeshData::default();
    for (normal, u, v) in faces {
        let base = mesh.vertices.len() as u32;
        let center = normal * p;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            mesh.vertices
                .push(MeshVertex::new(center + u * p * su + v * p * sv, normal));
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    mesh
}

/// UV sphere of radius 0.5.
fn sphere(rings: u32, segments: u32) -> MeshData {
    let mut mesh = MeshData::default();
    for ring in 0..=rings {
        let phi = std::f32::consts::PI * ring as f32 / rings as f32;
        for seg in 0..=segments {
            let theta = TAU * seg as f32 / segments as f32;
            let n = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
            mesh.vertices.push(MeshVertex::new(n * 0.5, n));
        }
    }
    let stride = segments + 1;
    for ring in 0..rings {
        for seg in 0..segments {
            let a = ring * stride + seg;
            let b = a + stride;
            mesh.indices
                .extend_from_slice(&[a, a + 1, b, b, a + 1, b + 1]);
        }
    }
    mesh
}

/// Unit quad in the XZ plane facing +Y.
fn plane() -> MeshData {
    let p = 0.5_f32;
    MeshData {
        vertices: vec![
            MeshVertex::new(Vec3::new(-p, 0.0, p), Vec3::Y),
            MeshVertex::new(Vec3::new(p, 0.0, p), Vec3::Y),
            MeshVertex::new(Vec3::new(p, 0.0, -p), Vec3::Y),
            MeshVertex::new(Vec3::new(-p, 0.0, -p), Vec3::Y),
        ],
        indices: vec![0, 1, 2, 2, 3, 0],
    }
}

fn ring_point(seg: u32, segments: u32, radius: f32, y: f32) -> (Vec3, Vec3) {
    let theta = TAU * seg as f32 / segments as f32;
    let dir = Vec3::new(theta.cos(), 0.0, theta.sin());
    (dir * radius + Vec3::Y * y, dir)
}

/// Flat disc cap; `up` selects the facing.
fn push_cap(mesh: &mut MeshData, segments: u32, radius: f32, y: f32, up: bool) {
    let normal = if up { Vec3::Y } else { Vec3::NEG_Y };
    let center = mesh.vertices.len() as u32;
    mesh.vertices
        .push(MeshVertex::new(Vec3::Y * y, normal));
    for seg in 0..=segments {
        let (p, _) = ring_point(seg, segments, radius, y);
        mesh.vertices.push(MeshVertex::new(p, normal));
    }
    for seg in 0..segments {
        let a = center + 1 + seg;
        if up {
            mesh.indices.extend_from_slice(&[center, a + 1, a]);
        } else {
            mesh.indices.extend_from_slice(&[center, a, a + 1]);
        }
    }
}

/// Cylinder of radius 0.5 and height 1 along Y.
fn cylinder(segments: u32) -> MeshData {
    let mut mesh = MeshData::default();
    for seg in 0..=segments {
        let (bottom, n) = ring_point(seg, segments, 0.5, -0.5);
        let (top, _) = ring_point(seg, segments, 0.5, 0.5);
        mesh.vertices.push(MeshVertex::new(bottom, n));
        mesh.vertices.push(MeshVertex::new(top, n));
    }
    for seg in 0..segments {
        let a = seg * 2;
        mesh.indices
            .extend_from_slice(&[a, a + 1, a + 2, a + 2, a + 1, a + 3]);
    }
    push_cap(&mut mesh, segments, 0.5, 0.5, true);
    push_cap(&mut mesh, segments, 0.5, -0.5, false);
    mesh
}

/// Cone of base radius 0.5 and height 1 along Y, apex up.
fn cone(segments: u32) -> MeshData {
    let mut mesh = MeshData::default();
    let apex = Vec3::Y * 0.5;
    for seg in 0..=segments {
        let (base, dir) = ring_point(seg, segments, 0.5, -0.5);
        // Side normal tilts up by the slope angle (height 1 over radius 0.5).
        let n = (dir + Vec3::Y * 0.5).normalize();
        mesh.vertices.push(MeshVertex::new(base, n));
        mesh.vertices.push(MeshVertex::new(apex, n));
    }
    for seg in 0..segments {
        let a = seg * 2;
        mesh.indices.extend_from_slice(&[a, a + 1, a + 2]);
    }
    push_cap(&mut mesh, segments, 0.5, -0.5, false);
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [MeshKind; 5] = [
        MeshKind::Cube,
        MeshKind::Sphere,
        MeshKind::Plane,
        MeshKind::Cylinder,
        MeshKind::Cone,
    ];

    #[test]
    fn every_builtin_kind_has_geometry() {
        let lib = PrimitiveLibrary::new();
        for kind in ALL {
            let d = lib.descriptor(kind).unwrap();
            assert!(d.geometry.index_count > 0, "{kind:?}");
            assert_eq!(d.geometry.index_count % 3, 0, "{kind:?}");
            assert_eq!(d.geometry.slot, GeometrySlot::Primitive(kind));
            let vertex_count = d.geometry.data.vertices.len() as u32;
            assert!(d.geometry.data.indices.iter().all(|&i| i < vertex_count));
        }
    }

    #[test]
    fn base_radii_match_shapes() {
        let lib = PrimitiveLibrary::new();
        assert!((lib.base_radius(MeshKind::Cube) - 0.75_f32.sqrt()).abs() < 1e-5);
        assert!((lib.base_radius(MeshKind::Sphere) - 0.5).abs() < 1e-5);
        assert!((lib.base_radius(MeshKind::Plane) - 0.5_f32.sqrt()).abs() < 1e-5);
        assert!((lib.base_radius(MeshKind::Cylinder) - 0.5_f32.sqrt()).abs() < 1e-5);
        assert_eq!(lib.base_radius(MeshKind::Custom), DEFAULT_CUSTOM_RADIUS);
    }

    #[test]
    fn register_extends_table() {
        let mut lib = PrimitiveLibrary::new();
        assert!(lib.descriptor(MeshKind::Custom).is_none());
        lib.register(MeshKind::Custom, plane());
        assert!(lib.descriptor(MeshKind::Custom).is_some());
        assert!((lib.base_radius(MeshKind::Custom) - 0.5_f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn fallback_is_cube() {
        let lib = PrimitiveLibrary::new();
        assert_eq!(
            lib.fallback().geometry.slot,
            GeometrySlot::Primitive(MeshKind::Cube)
        );
        assert_eq!(lib.fallback().geometry.index_count, 36);
    }

    #[test]
    fn normals_are_unit_length() {
        let lib = PrimitiveLibrary::new();
        for kind in ALL {
            let d = lib.descriptor(kind).unwrap();
            for v in &d.geometry.data.vertices {
                let n = Vec3::from_array(v.normal);
                assert!((n.length() - 1.0).abs() < 1e-4, "{kind:?}");
            }
        }
    }
}
