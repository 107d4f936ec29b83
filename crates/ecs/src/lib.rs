//! Component model for the editor scene.
//!
//! Components are stored in BTreeMap for deterministic iteration order.
//! Each component type has its own storage keyed by EntityId.
//!
//! # Invariants
//! - All component mutations produce events.
//! - Iteration order is deterministic (BTreeMap).

mod scene;

pub use scene::{Scene, SceneMut, SceneQuery};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stagehand_common::EntityId;

/// Identifier of a material known to the external asset system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u64);

/// Identifier of an external mesh asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub u64);

/// Shape family of a renderable. Built-in kinds map to procedural primitives;
/// `Custom` is geometry loaded through the mesh provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MeshKind {
    Cube,
    Sphere,
    Plane,
    Cylinder,
    Cone,
    Custom,
}

/// Where a renderable's geometry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshSource {
    Primitive(MeshKind),
    Asset { mesh: MeshId, submesh: u32 },
}

impl MeshSource {
    pub fn kind(&self) -> MeshKind {
        match self {
            Self::Primitive(kind) => *kind,
            Self::Asset { .. } => MeshKind::Custom,
        }
    }
}

/// Human-readable name component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name(pub String);

/// Renderable component: references mesh and material assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshRenderer {
    pub mesh: MeshSource,
    pub material: MaterialId,
}

impl MeshRenderer {
    pub fn primitive(kind: MeshKind, material: MaterialId) -> Self {
        Self {
            mesh: MeshSource::Primitive(kind),
            material,
        }
    }

    pub fn asset(mesh: MeshId, submesh: u32, material: MaterialId) -> Self {
        Self {
            mesh: MeshSource::Asset { mesh, submesh },
            material,
        }
    }
}

/// Events produced by component mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComponentEvent {
    NameAdded { entity: EntityId, name: String },
    NameRemoved { entity: EntityId, name: String },
    NameUpdated { entity: EntityId, old: String, new: String },
    MeshRendererAdded { entity: EntityId, renderer: MeshRenderer },
    MeshRendererRemoved { entity: EntityId, renderer: MeshRenderer },
    MeshRendererUpdated { entity: EntityId, old: MeshRenderer, new: MeshRenderer },
}

/// Deterministic component storage for all component types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentStore {
    names: BTreeMap<EntityId, Name>,
    mesh_renderers: BTreeMap<EntityId, MeshRenderer>,
    #[serde(skip)]
    events: Vec<ComponentEvent>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return all pending component events.
    pub fn drain_events(&mut self) -> Vec<ComponentEvent> {
        std::mem::take(&mut self.events)
    }

    /// Read-only access to pending events.
    pub fn events(&self) -> &[ComponentEvent] {
        &self.events
    }

    // --- Name ---
    pub fn set_name(&mut self, entity: EntityId, name: String) {
        if let Some(old) = self.names.get(&entity) {
            self.events.push(ComponentEvent::NameUpdated {
                entity,
                old: old.0.clone(),
                new: name.clone(),
            });
        } else {
            self.events.push(ComponentEvent::NameAdded {
                entity,
                name: name.clone(),
            });
        }
        self.names.insert(entity, Name(name));
    }

    pub fn remove_name(&mut self, entity: EntityId) -> Option<Name> {
        let removed = self.names.remove(&entity);
        if let Some(ref n) = removed {
            self.events.push(ComponentEvent::NameRemoved {
                entity,
                name: n.0.clone(),
            });
        }
        removed
    }

    pub fn get_name(&self, entity: EntityId) -> Option<&Name> {
        self.names.get(&entity)
    }

    pub fn names(&self) -> &BTreeMap<EntityId, Name> {
        &self.names
    }

    // --- MeshRenderer ---
    pub fn set_mesh_renderer(&mut self, entity: EntityId, renderer: MeshRenderer) {
        if let Some(old) = self.mesh_renderers.get(&entity) {
            self.events.push(ComponentEvent::MeshRendererUpdated {
                entity,
                old: *old,
                new: renderer,
            });
        } else {
            self.events.push(ComponentEvent::MeshRendererAdded { entity, renderer });
        }
        self.mesh_renderers.insert(entity, renderer);
    }

    pub fn remove_mesh_renderer(&mut self, entity: EntityId) -> Option<MeshRenderer> {
        let removed = self.mesh_renderers.remove(&entity);
        if let Some(renderer) = removed {
            self.events
                .push(ComponentEvent::MeshRendererRemoved { entity, renderer });
        }
        removed
    }

    pub fn get_mesh_renderer(&self, entity: EntityId) -> Option<&MeshRenderer> {
        self.mesh_renderers.get(&entity)
    }

    pub fn mesh_renderers(&self) -> &BTreeMap<EntityId, MeshRenderer> {
        &self.mesh_renderers
    }

    /// Remove all components for an entity.
    pub fn remove_entity(&mut self, entity: EntityId) {
        self.remove_name(entity);
        self.remove_mesh_renderer(entity);
    }

    /// Replay a component event (for undo/redo).
    pub fn apply_event(&mut self, event: &ComponentEvent) {
        match event {
            ComponentEvent::NameAdded { entity, name } => {
                self.names.insert(*entity, Name(name.clone()));
            }
            ComponentEvent::NameRemoved { entity, .. } => {
                self.names.remove(entity);
            }
            ComponentEvent::NameUpdated { entity, new, .. } => {
                self.names.insert(*entity, Name(new.clone()));
            }
            ComponentEvent::MeshRendererAdded { entity, renderer } => {
                self.mesh_renderers.insert(*entity, *renderer);
            }
            ComponentEvent::MeshRendererRemoved { entity, .. } => {
                self.mesh_renderers.remove(entity);
            }
            ComponentEvent::MeshRendererUpdated { entity, new, .. } => {
                self.mesh_renderers.insert(*entity, *new);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_add_remove() {
        let mut store = ComponentStore::new();
        let id = EntityId(1);
        store.set_name(id, "Test".into());
        assert_eq!(store.get_name(id).unwrap().0, "Test");

        store.remove_name(id);
        assert!(store.get_name(id).is_none());
        assert_eq!(store.events().len(), 2);
    }

    #[test]
    fn name_update_produces_event() {
        let mut store = ComponentStore::new();
        let id = EntityId(1);
        store.set_name(id, "First".into());
        store.set_name(id, "Second".into());
        assert_eq!(store.get_name(id).unwrap().0, "Second");
        // Add + Update
        assert_eq!(store.events().len(), 2);
    }

    #[test]
    fn mesh_renderer_add_remove() {
        let mut store = ComponentStore::new();
        let id = EntityId(4);
        let r = MeshRenderer::primitive(MeshKind::Sphere, MaterialId(2));
        store.set_mesh_renderer(id, r);
        assert_eq!(store.get_mesh_renderer(id), Some(&r));

        store.remove_mesh_renderer(id);
        assert!(store.get_mesh_renderer(id).is_none());
    }

    #[test]
    fn mesh_source_kind() {
        assert_eq!(MeshSource::Primitive(MeshKind::Cone).kind(), MeshKind::Cone);
        let asset = MeshRenderer::asset(MeshId(9), 1, MaterialId(0));
        assert_eq!(asset.mesh.kind(), MeshKind::Custom);
    }

    #[test]
    fn remove_entity_clears_all() {
        let mut store = ComponentStore::new();
        let id = EntityId(3);
        store.set_name(id, "Test".into());
        store.set_mesh_renderer(id, MeshRenderer::primitive(MeshKind::Cube, MaterialId(0)));

        store.remove_entity(id);
        assert!(store.get_name(id).is_none());
        assert!(store.get_mesh_renderer(id).is_none());
    }

    #[test]
    fn apply_event_replay() {
        let mut store = ComponentStore::new();
        let id = EntityId(8);
        let event = ComponentEvent::NameAdded {
            entity: id,
            name: "Replayed".into(),
        };
        store.apply_event(&event);
        assert_eq!(store.get_name(id).unwrap().0, "Replayed");
    }

    #[test]
    fn drain_events() {
        let mut store = ComponentStore::new();
        store.set_name(EntityId(1), "Test".into());
        let events = store.drain_events();
        assert_eq!(events.len(), 1);
        assert!(store.events().is_empty());
    }
}
