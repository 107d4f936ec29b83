//! Per-frame render-list construction.
//!
//! Walks the active entities once, culls bounding spheres against the camera
//! frustum and resolves materials and geometry through the caches. The scene
//! is only read; the caches are the only state touched.

use glam::{Mat3, Mat4};
use std::sync::Arc;
use stagehand_assets::{
    GeometryHandle, MaterialCache, MaterialResolver, MaterialRuntime, MeshCache, MeshProvider,
    PrimitiveLibrary,
};
use stagehand_common::{CameraParams, EntityId, Frustum, ObjectId};
use stagehand_ecs::{MaterialId, MeshKind, MeshSource, SceneQuery};

/// One drawable for the current frame. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct RenderItem {
    pub entity: EntityId,
    pub geometry: GeometryHandle,
    pub world: Mat4,
    /// Inverse-transpose of the upper 3x3 of `world`.
    pub normal: Mat3,
    pub material_id: MaterialId,
    pub material: Arc<MaterialRuntime>,
    pub kind: MeshKind,
    /// Squared distance from the camera to the entity origin.
    pub distance_sq: f32,
}

impl RenderItem {
    pub fn object_id(&self) -> ObjectId {
        self.entity.object_id()
    }
}

/// Counters for one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderListStats {
    pub considered: usize,
    pub culled: usize,
    pub emitted: usize,
}

/// Ordered output of a build: opaque items grouped by material, then
/// transparent items back to front.
#[derive(Debug, Clone, Default)]
pub struct RenderList {
    items: Vec<RenderItem>,
    opaque_len: usize,
    stats: RenderListStats,
}

impl RenderList {
    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    pub fn opaque(&self) -> &[RenderItem] {
        &self.items[..self.opaque_len]
    }

    pub fn transparent(&self) -> &[RenderItem] {
        &self.items[self.opaque_len..]
    }

    pub fn stats(&self) -> RenderListStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.items.iter().any(|i| i.entity == entity)
    }
}

/// Material cache, custom mesh cache and the primitive table, owned together
/// by the viewport.
#[derive(Debug)]
pub struct RenderAssets<R, P> {
    pub materials: MaterialCache<R>,
    pub meshes: MeshCache<P>,
    pub primitives: PrimitiveLibrary,
}

impl<R: MaterialResolver, P: MeshProvider> RenderAssets<R, P> {
    pub fn new(resolver: R, provider: P) -> Self {
        Self {
            materials: MaterialCache::new(resolver),
            meshes: MeshCache::new(provider),
            primitives: PrimitiveLibrary::new(),
        }
    }

    /// Culling radius at unit scale. Custom meshes use their exact bounds
    /// once loaded.
    fn base_radius(&self, source: &MeshSource) -> f32 {
        match source {
            MeshSource::Primitive(kind) => self.primitives.base_radius(*kind),
            MeshSource::Asset { mesh, submesh } => self
                .meshes
                .get(*mesh, *submesh)
                .map(|g| g.bounding_radius)
                .unwrap_or_else(|| self.primitives.base_radius(MeshKind::Custom)),
        }
    }

    fn geometry(&mut self, source: &MeshSource) -> GeometryHandle {
        match source {
            MeshSource::Primitive(kind) => self
                .primitives
                .descriptor(*kind)
                .unwrap_or_else(|| self.primitives.fallback())
                .geometry
                .clone(),
            MeshSource::Asset { mesh, submesh } => {
                self.meshes.resolve(*mesh, *submesh, &self.primitives)
            }
        }
    }
}

/// True when the sphere lies entirely behind at least one frustum plane.
pub fn is_culled(frustum: &Frustum, center: glam::Vec3, radius: f32) -> bool {
    !frustum.intersects_sphere(center, radius)
}

/// Build the render list for one frame.
pub fn build_render_list<S, R, P>(
    scene: &S,
    camera: &CameraParams,
    assets: &mut RenderAssets<R, P>,
) -> RenderList
where
    S: SceneQuery + ?Sized,
    R: MaterialResolver,
    P: MeshProvider,
{
    let _span = tracing::info_span!("build_render_list").entered();
    let frustum = camera.frustum();
    let mut stats = RenderListStats::default();
    let mut opaque = Vec::new();
    let mut transparent = Vec::new();

    for entity in scene.active_entities() {
        let Some(renderer) = scene.mesh_renderer(entity).copied() else {
            continue;
        };
        let Some(transform) = scene.world_transform(entity) else {
            continue;
        };
        stats.considered += 1;

        let radius = assets.base_radius(&renderer.mesh) * transform.max_abs_scale();
        if is_culled(&frustum, transform.position, radius) {
            stats.culled += 1;
            continue;
        }

        let material = assets.materials.get(renderer.material);
        let geometry = assets.geometry(&renderer.mesh);
        let world = transform.to_matrix();
        let item = RenderItem {
            entity,
            geometry,
            world,
            normal: Mat3::from_mat4(world).inverse().transpose(),
            material_id: renderer.material,
            kind: renderer.mesh.kind(),
            distance_sq: camera.position.distance_squared(transform.position),
            material,
        };
        if item.material.is_transparent() {
            transparent.push(item);
        } else {
            opaque.push(item);
        }
    }

    // Stable sort keeps scene order inside one material group.
    opaque.sort_by_key(|item| item.material_id);
    transparent.sort_by(|a, b| b.distance_sq.total_cmp(&a.distance_sq));

    let opaque_len = opaque.len();
    let mut items = opaque;
    items.append(&mut transparent);
    stats.emitted = items.len();
    tracing::trace!(
        considered = stats.considered,
        culled = stats.culled,
        emitted = stats.emitted,
        "render list built"
    );

    RenderList {
        items,
        opaque_len,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec2, Vec3, Vec4};
    use stagehand_assets::{MaterialDesc, MeshData, NoMeshProvider, ResolveError};
    use stagehand_common::Transform;
    use stagehand_ecs::{MeshId, MeshRenderer, Scene};

    fn camera() -> CameraParams {
        CameraParams::look_at(
            Vec3::new(0.0, 0.0, 10.0),
            Vec3::ZERO,
            Vec3::Y,
            60f32.to_radians(),
            0.1,
            100.0,
            UVec2::new(640, 480),
        )
    }

    fn resolver(id: MaterialId) -> Result<MaterialDesc, ResolveError> {
        Ok(MaterialDesc {
            transparent: id.0 >= 100,
            base_color: Vec4::new(id.0 as f32 / 255.0, 0.5, 0.5, 1.0),
            ..MaterialDesc::default()
        })
    }

    type Resolver = fn(MaterialId) -> Result<MaterialDesc, ResolveError>;

    fn assets() -> RenderAssets<Resolver, NoMeshProvider> {
        RenderAssets::new(resolver as Resolver, NoMeshProvider)
    }

    fn cube_at(scene: &mut Scene, pos: Vec3, material: u64) -> EntityId {
        scene
            .spawn_mesh(
                "cube",
                Transform::from_position(pos),
                MeshRenderer::primitive(MeshKind::Cube, MaterialId(material)),
            )
            .unwrap()
    }

    #[test]
    fn culls_entities_outside_frustum() {
        let mut scene = Scene::new();
        let visible = cube_at(&mut scene, Vec3::ZERO, 1);
        let behind = cube_at(&mut scene, Vec3::new(0.0, 0.0, 30.0), 1);
        let left = cube_at(&mut scene, Vec3::new(-100.0, 0.0, 0.0), 1);

        let list = build_render_list(&scene, &camera(), &mut assets());
        assert!(list.contains(visible));
        assert!(!list.contains(behind));
        assert!(!list.contains(left));
        assert_eq!(list.stats().considered, 3);
        assert_eq!(list.stats().culled, 2);
        assert_eq!(list.stats().emitted, 1);
    }

    #[test]
    fn scale_grows_culling_radius() {
        let mut scene = Scene::new();
        // Centre just outside the right edge of the view at z = 0.
        let id = scene
            .spawn_mesh(
                "wide",
                Transform {
                    position: Vec3::new(9.0, 0.0, 0.0),
                    scale: Vec3::new(1.0, 1.0, -6.0),
                    ..Transform::default()
                },
                MeshRenderer::primitive(MeshKind::Cube, MaterialId(1)),
            )
            .unwrap();
        let list = build_render_list(&scene, &camera(), &mut assets());
        assert!(list.contains(id));
    }

    #[test]
    fn entities_without_renderer_or_inactive_are_skipped() {
        let mut scene = Scene::new();
        let bare = scene.world.spawn(Transform::default()).unwrap();
        let hidden = cube_at(&mut scene, Vec3::ZERO, 1);
        scene.world.set_active(hidden, false);
        let list = build_render_list(&scene, &camera(), &mut assets());
        assert!(!list.contains(bare));
        assert!(list.is_empty());
        assert_eq!(list.stats().considered, 0);
    }

    #[test]
    fn opaque_grouped_by_material() {
        let mut scene = Scene::new();
        let a = cube_at(&mut scene, Vec3::new(-1.0, 0.0, 0.0), 3);
        let b = cube_at(&mut scene, Vec3::new(0.0, 0.0, 0.0), 1);
        let c = cube_at(&mut scene, Vec3::new(1.0, 0.0, 0.0), 3);
        let d = cube_at(&mut scene, Vec3::new(2.0, 0.0, 0.0), 1);
        let list = build_render_list(&scene, &camera(), &mut assets());
        let order: Vec<EntityId> = list.opaque().iter().map(|i| i.entity).collect();
        assert_eq!(order, vec![b, d, a, c]);
    }

    #[test]
    fn transparent_sorted_back_to_front_after_opaque() {
        let mut scene = Scene::new();
        let near = cube_at(&mut scene, Vec3::new(0.0, 0.0, 2.0), 100);
        let solid = cube_at(&mut scene, Vec3::ZERO, 1);
        let far = cube_at(&mut scene, Vec3::new(0.0, 0.0, -5.0), 101);
        let list = build_render_list(&scene, &camera(), &mut assets());

        assert_eq!(list.opaque().len(), 1);
        assert_eq!(list.opaque()[0].entity, solid);
        let order: Vec<EntityId> = list.transparent().iter().map(|i| i.entity).collect();
        assert_eq!(order, vec![far, near]);
        assert_eq!(list.items().last().map(|i| i.entity), Some(near));
    }

    #[test]
    fn custom_mesh_uses_exact_radius_once_loaded() {
        let mut scene = Scene::new();
        let id = scene
            .spawn_mesh(
                "tiny",
                Transform::from_position(Vec3::ZERO),
                MeshRenderer::asset(MeshId(1), 0, MaterialId(1)),
            )
            .unwrap();
        let mut assets = RenderAssets::new(resolver as Resolver, |_: MeshId, _: u32| {
            Some(MeshData {
                vertices: vec![stagehand_assets::MeshVertex::new(Vec3::X * 0.1, Vec3::Y); 3],
                indices: vec![0, 1, 2],
            })
        });
        let list = build_render_list(&scene, &camera(), &mut assets);
        assert!(list.contains(id));
        assert_eq!(list.items()[0].kind, MeshKind::Custom);
        assert!((assets.base_radius(&MeshSource::Asset { mesh: MeshId(1), submesh: 0 }) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn normal_matrix_is_inverse_transpose() {
        let mut scene = Scene::new();
        scene
            .spawn_mesh(
                "stretched",
                Transform {
                    scale: Vec3::new(2.0, 1.0, 1.0),
                    ..Transform::default()
                },
                MeshRenderer::primitive(MeshKind::Cube, MaterialId(1)),
            )
            .unwrap();
        let list = build_render_list(&scene, &camera(), &mut assets());
        let item = &list.items()[0];
        assert!((item.normal.x_axis.x - 0.5).abs() < 1e-6);
        assert!((item.distance_sq - 100.0).abs() < 1e-4);
    }
}
