use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::collections::HashMap;
use std::sync::Arc;
use stagehand_ecs::{MeshId, MeshKind};

use crate::primitives::PrimitiveLibrary;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
        }
    }
}

/// CPU-side indexed triangle mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Radius of the smallest origin-centered sphere containing every vertex.
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| Vec3::from_array(v.position).length())
            .fold(0.0, f32::max)
    }

    /// Triangles as position triples; indices out of range are skipped.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(|tri| {
            let p = |i: u32| {
                self.vertices
                    .get(i as usize)
                    .map(|v| Vec3::from_array(v.position))
            };
            Some([p(tri[0])?, p(tri[1])?, p(tri[2])?])
        })
    }

    /// Unique edges, for wireframe overlays.
    pub fn edges(&self) -> Vec<(u32, u32)> {
        let mut edges: Vec<(u32, u32)> = self
            .indices
            .chunks_exact(3)
            .flat_map(|t| [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])])
            .map(|(a, b)| if a < b { (a, b) } else { (b, a) })
            .collect();
        edges.sort_unstable();
        edges.dedup();
        edges
    }
}

/// Stable key a backend uses to find its uploaded copy of the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometrySlot {
    Primitive(MeshKind),
    Custom(u32),
}

/// Geometry ready to be drawn.
#[derive(Debug, Clone)]
pub struct GeometryHandle {
    pub slot: GeometrySlot,
    pub data: Arc<MeshData>,
    pub index_count: u32,
    pub bounding_radius: f32,
}

impl GeometryHandle {
    pub fn new(slot: GeometrySlot, data: MeshData) -> Self {
        let index_count = data.index_count();
        let bounding_radius = data.bounding_radius();
        Self {
            slot,
            data: Arc::new(data),
            index_count,
            bounding_radius,
        }
    }
}

/// External mesh source. `None` means the mesh could not be loaded and the
/// caller falls back to a built-in primitive.
pub trait MeshProvider {
    fn load(&mut self, mesh: MeshId, submesh: u32) -> Option<MeshData>;
}

impl<F> MeshProvider for F
where
    F: FnMut(MeshId, u32) -> Option<MeshData>,
{
    fn load(&mut self, mesh: MeshId, submesh: u32) -> Option<MeshData> {
        self(mesh, submesh)
    }
}

/// Provider for setups without external meshes; every load falls back.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMeshProvider;

impl MeshProvider for NoMeshProvider {
    fn load(&mut self, _mesh: MeshId, _submesh: u32) -> Option<MeshData> {
        None
    }
}

#[derive(Debug, Clone)]
struct CachedMesh {
    geometry: GeometryHandle,
    is_fallback: bool,
}

/// (mesh id, submesh) → uploaded geometry. Populated once per key and never
/// evicted.
#[derive(Debug)]
pub struct MeshCache<P> {
    provider: P,
    entries: HashMap<(MeshId, u32), CachedMesh>,
    next_slot: u32,
}

impl<P: MeshProvider> MeshCache<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            entries: HashMap::new(),
            next_slot: 0,
        }
    }

    /// Geometry for a custom mesh, loading it on first use. A failed load
    /// caches the cube primitive so it is not retried.
    pub fn resolve(
        &mut self,
        mesh: MeshId,
        submesh: u32,
        primitives: &PrimitiveLibrary,
    ) -> GeometryHandle {
        if let Some(cached) = self.entries.get(&(mesh, submesh)) {
            return cached.geometry.clone();
        }

        let cached = match self.provider.load(mesh, submesh) {
            Some(data) if !data.indices.is_empty() => {
                let slot = GeometrySlot::Custom(self.next_slot);
                self.next_slot += 1;
                tracing::debug!(?mesh, submesh, indices = data.indices.len(), "custom mesh loaded");
                CachedMesh {
                    geometry: GeometryHandle::new(slot, data),
                    is_fallback: false,
                }
            }
            _ => {
                tracing::warn!(?mesh, submesh, "mesh load failed, using fallback primitive");
                CachedMesh {
                    geometry: primitives.fallback().geometry.clone(),
                    is_fallback: true,
                }
            }
        };
        let geometry = cached.geometry.clone();
        self.entries.insert((mesh, submesh), cached);
        geometry
    }

    /// Cached geometry without loading.
    pub fn get(&self, mesh: MeshId, submesh: u32) -> Option<&GeometryHandle> {
        self.entries.get(&(mesh, submesh)).map(|c| &c.geometry)
    }

    pub fn is_fallback(&self, mesh: MeshId, submesh: u32) -> bool {
        self.entries
            .get(&(mesh, submesh))
            .is_some_and(|c| c.is_fallback)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(scale: f32) -> MeshData {
        MeshData {
            vertices: vec![
                MeshVertex::new(Vec3::ZERO, Vec3::Z),
                MeshVertex::new(Vec3::X * scale, Vec3::Z),
                MeshVertex::new(Vec3::Y * scale, Vec3::Z),
            ],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn bounding_radius_is_max_vertex_distance() {
        assert_eq!(triangle(3.0).bounding_radius(), 3.0);
    }

    #[test]
    fn edges_are_unique() {
        let quad = MeshData {
            vertices: vec![MeshVertex::new(Vec3::ZERO, Vec3::Z); 4],
            indices: vec![0, 1, 2, 2, 3, 0],
        };
        // Four sides plus the shared diagonal.
        assert_eq!(quad.edges().len(), 5);
    }

    #[test]
    fn loads_once_per_key() {
        let mut calls = 0;
        let primitives = PrimitiveLibrary::new();
        {
            let mut cache = MeshCache::new(|_: MeshId, _: u32| {
                calls += 1;
                Some(triangle(1.0))
            });
            let a = cache.resolve(MeshId(1), 0, &primitives);
            let b = cache.resolve(MeshId(1), 0, &primitives);
            assert_eq!(a.slot, b.slot);
            let c = cache.resolve(MeshId(1), 1, &primitives);
            assert_ne!(a.slot, c.slot);
            assert_eq!(cache.len(), 2);
        }
        assert_eq!(calls, 2);
    }

    #[test]
    fn failed_load_falls_back_and_is_cached() {
        let mut calls = 0;
        let primitives = PrimitiveLibrary::new();
        {
            let mut cache = MeshCache::new(|_: MeshId, _: u32| {
                calls += 1;
                None
            });
            for _ in 0..3 {
                let g = cache.resolve(MeshId(5), 0, &primitives);
                assert_eq!(g.slot, GeometrySlot::Primitive(MeshKind::Cube));
            }
            assert!(cache.is_fallback(MeshId(5), 0));
            assert!(cache.get(MeshId(5), 0).is_some());
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn empty_mesh_counts_as_failure() {
        let primitives = PrimitiveLibrary::new();
        let mut cache = MeshCache::new(|_: MeshId, _: u32| Some(MeshData::default()));
        let g = cache.resolve(MeshId(1), 0, &primitives);
        assert_eq!(g.slot, GeometrySlot::Primitive(MeshKind::Cube));
    }
}
