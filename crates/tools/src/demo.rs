//! A small scene exercising every primitive kind, a parent link and a
//! transparent material.

use glam::{Quat, Vec3, Vec4};
use stagehand_assets::{MaterialDesc, MaterialLibrary, ShadingMode};
use stagehand_common::{EntityId, Transform};
use stagehand_ecs::{MaterialId, MeshKind, MeshRenderer, Scene};
use stagehand_kernel::SceneError;

pub const GROUND: MaterialId = MaterialId(1);
pub const RED: MaterialId = MaterialId(2);
pub const GREEN: MaterialId = MaterialId(3);
pub const BLUE: MaterialId = MaterialId(4);
pub const GLASS: MaterialId = MaterialId(5);
pub const GLOW: MaterialId = MaterialId(6);

fn lit(color: Vec4) -> MaterialDesc {
    MaterialDesc {
        base_color: color,
        ..MaterialDesc::default()
    }
}

pub fn materials() -> MaterialLibrary {
    let mut library = MaterialLibrary::new();
    library.set_material(GROUND, "ground", lit(Vec4::new(0.35, 0.36, 0.38, 1.0)));
    library.set_material(RED, "red", lit(Vec4::new(0.85, 0.2, 0.15, 1.0)));
    library.set_material(GREEN, "green", lit(Vec4::new(0.2, 0.75, 0.3, 1.0)));
    library.set_material(BLUE, "blue", lit(Vec4::new(0.2, 0.35, 0.9, 1.0)));
    library.set_material(
        GLASS,
        "glass",
        MaterialDesc {
            base_color: Vec4::new(0.7, 0.85, 1.0, 0.35),
            transparent: true,
            ..MaterialDesc::default()
        },
    );
    library.set_material(
        GLOW,
        "glow",
        MaterialDesc {
            base_color: Vec4::new(1.0, 0.8, 0.2, 1.0),
            emissive: Vec3::new(0.6, 0.4, 0.0),
            shading: ShadingMode::Unlit,
            ..MaterialDesc::default()
        },
    );
    library
}

/// Spawn the demo entities into `scene`, returning them in spawn order.
pub fn populate(scene: &mut Scene) -> Result<Vec<EntityId>, SceneError> {
    let mesh = |kind, material| MeshRenderer::primitive(kind, material);
    let at = |x: f32, y: f32, z: f32| Transform::from_position(Vec3::new(x, y, z));

    let ground = scene.spawn_mesh(
        "ground",
        Transform {
            scale: Vec3::new(12.0, 1.0, 12.0),
            ..Transform::IDENTITY
        },
        mesh(MeshKind::Plane, GROUND),
    )?;
    let cube = scene.spawn_mesh("cube", at(-2.5, 0.5, 0.0), mesh(MeshKind::Cube, RED))?;
    let sphere = scene.spawn_mesh("sphere", at(0.0, 0.5, 0.0), mesh(MeshKind::Sphere, GREEN))?;
    let cylinder = scene.spawn_mesh(
        "cylinder",
        at(2.5, 0.5, 0.0),
        mesh(MeshKind::Cylinder, BLUE),
    )?;
    let cone = scene.spawn_mesh(
        "cone",
        Transform {
            rotation: Quat::from_rotation_y(0.4),
            ..at(0.0, 0.5, -2.5)
        },
        mesh(MeshKind::Cone, GLOW),
    )?;
    let glass = scene.spawn_mesh("glass", at(0.0, 0.75, 2.5), mesh(MeshKind::Cube, GLASS))?;

    // A moon riding on the cube.
    let moon = scene.world.spawn_child(
        cube,
        Transform {
            position: Vec3::new(0.0, 1.2, 0.0),
            scale: Vec3::splat(0.4),
            ..Transform::IDENTITY
        },
    )?;
    scene.components.set_name(moon, "moon".to_string());
    scene
        .components
        .set_mesh_renderer(moon, mesh(MeshKind::Sphere, GLOW));

    let ids = vec![ground, cube, sphere, cylinder, cone, glass, moon];
    tracing::debug!(entities = ids.len(), "demo scene populated");
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_ecs::SceneQuery;

    #[test]
    fn demo_scene_is_renderable() {
        let mut scene = Scene::new();
        let ids = populate(&mut scene).unwrap();
        assert_eq!(ids.len(), 7);
        let library = materials();
        for id in &ids {
            let renderer = scene.mesh_renderer(*id).unwrap();
            assert!(library.get(renderer.material).is_some());
        }
        let moon = *ids.last().unwrap();
        assert_eq!(scene.parent(moon), Some(ids[1]));
        assert_eq!(scene.name(moon), Some("moon"));
        let world = scene.world_transform(moon).unwrap();
        assert!(world.position.abs_diff_eq(Vec3::new(-2.5, 1.7, 0.0), 1e-5));
    }
}
