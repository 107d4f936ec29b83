use stagehand_common::{EntityId, Transform};
use stagehand_kernel::{SceneError, World};

use crate::{ComponentStore, MeshRenderer};

/// Read-only scene interface consumed by the render-list builder and picking.
pub trait SceneQuery {
    /// Entities that are active in the hierarchy, in deterministic order.
    fn active_entities(&self) -> Box<dyn Iterator<Item = EntityId> + '_>;

    fn contains(&self, id: EntityId) -> bool;

    fn world_transform(&self, id: EntityId) -> Option<Transform>;

    fn mesh_renderer(&self, id: EntityId) -> Option<&MeshRenderer>;

    /// Parent in the hierarchy; flat scenes have none.
    fn parent(&self, _id: EntityId) -> Option<EntityId> {
        None
    }

    /// Whether `ancestor` appears on the parent chain of `id`.
    fn is_descendant_of(&self, id: EntityId, ancestor: EntityId) -> bool {
        let mut current = self.parent(id);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }
}

/// Transform access used by the gizmo while dragging.
pub trait SceneMut: SceneQuery {
    fn local_transform(&self, id: EntityId) -> Option<Transform>;

    fn set_local_transform(&mut self, id: EntityId, transform: Transform) -> bool;

    fn set_world_transform(&mut self, id: EntityId, transform: Transform) -> bool;
}

/// The editor scene: the kernel world plus its component storage.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub world: World,
    pub components: ComponentStore,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a root entity carrying a mesh renderer.
    pub fn spawn_mesh(
        &mut self,
        name: impl Into<String>,
        transform: Transform,
        renderer: MeshRenderer,
    ) -> Result<EntityId, SceneError> {
        let id = self.world.spawn(transform)?;
        self.components.set_name(id, name.into());
        self.components.set_mesh_renderer(id, renderer);
        tracing::debug!(%id, "spawned mesh entity");
        Ok(id)
    }

    /// Remove an entity and all of its components.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        if self.world.despawn(id).is_none() {
            return false;
        }
        self.components.remove_entity(id);
        true
    }

    pub fn name(&self, id: EntityId) -> Option<&str> {
        self.components.get_name(id).map(|n| n.0.as_str())
    }
}

impl SceneQuery for Scene {
    fn active_entities(&self) -> Box<dyn Iterator<Item = EntityId> + '_> {
        Box::new(
            self.world
                .entities()
                .keys()
                .copied()
                .filter(|id| self.world.is_active_in_hierarchy(*id)),
        )
    }

    fn contains(&self, id: EntityId) -> bool {
        self.world.contains(id)
    }

    fn world_transform(&self, id: EntityId) -> Option<Transform> {
        self.world.world_transform(id)
    }

    fn mesh_renderer(&self, id: EntityId) -> Option<&MeshRenderer> {
        self.components.get_mesh_renderer(id)
    }

    fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.world.get(id).and_then(|d| d.parent)
    }
}

impl SceneMut for Scene {
    fn local_transform(&self, id: EntityId) -> Option<Transform> {
        self.world.get(id).map(|d| d.transform)
    }

    fn set_local_transform(&mut self, id: EntityId, transform: Transform) -> bool {
        self.world.set_transform(id, transform)
    }

    fn set_world_transform(&mut self, id: EntityId, transform: Transform) -> bool {
        self.world.set_world_transform(id, transform)
    }
}
