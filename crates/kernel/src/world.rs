use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stagehand_common::{EntityId, IdError, Transform};

/// An event record produced by every mutation to the world.
///
/// Each event carries enough information to reverse the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// Entity was spawned with the given local transform.
    Spawned {
        id: EntityId,
        transform: Transform,
        parent: Option<EntityId>,
    },
    /// Entity was despawned. Carries the data it had for undo support.
    Despawned { id: EntityId, transform: Transform },
    /// Entity local transform was updated.
    TransformUpdated {
        id: EntityId,
        old: Transform,
        new: Transform,
    },
    /// Entity was attached to a new parent (or detached with `None`).
    ParentChanged {
        id: EntityId,
        old: Option<EntityId>,
        new: Option<EntityId>,
    },
    /// Entity active flag toggled.
    ActiveChanged { id: EntityId, active: bool },
}

/// Errors from scene operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error("entity {0} already exists")]
    AlreadyExists(EntityId),
    #[error("parenting {child} under {parent} would create a cycle")]
    ParentCycle { child: EntityId, parent: EntityId },
    #[error(transparent)]
    Id(#[from] IdError),
}

/// Per-entity data stored in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    /// Transform relative to the parent (or the world for roots).
    pub transform: Transform,
    pub parent: Option<EntityId>,
    pub active: bool,
}

/// The authoritative scene graph.
///
/// The kernel owns the truth; the renderer reads it every frame and the
/// gizmo writes transforms back through explicit operations.
///
/// Uses BTreeMap for deterministic iteration order across all platforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    entities: BTreeMap<EntityId, EntityData>,
    next_id: u32,
    /// Append-only event log of all mutations.
    #[serde(skip)]
    event_log: Vec<WorldEvent>,
}

impl Default for World {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: EntityId::FIRST.0,
            event_log: Vec::new(),
        }
    }
}

impl World {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities in the world.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Drain and return the event log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    /// Read-only access to all entities (BTreeMap for deterministic iteration).
    pub fn entities(&self) -> &BTreeMap<EntityId, EntityData> {
        &self.entities
    }

    /// Spawn a new root entity with the given transform. Returns its id.
    pub fn spawn(&mut self, transform: Transform) -> Result<EntityId, SceneError> {
        let id = self.allocate_id()?;
        self.spawn_with_id(id, transform, None)?;
        Ok(id)
    }

    /// Spawn a new entity under `parent` with a transform relative to it.
    pub fn spawn_child(
        &mut self,
        parent: EntityId,
        transform: Transform,
    ) -> Result<EntityId, SceneError> {
        if !self.entities.contains_key(&parent) {
            return Err(SceneError::EntityNotFound(parent));
        }
        let id = self.allocate_id()?;
        self.spawn_with_id(id, transform, Some(parent))?;
        Ok(id)
    }

    /// Spawn an entity with a specific id (used for undo/redo).
    pub fn spawn_with_id(
        &mut self,
        id: EntityId,
        transform: Transform,
        parent: Option<EntityId>,
    ) -> Result<(), SceneError> {
        let id = EntityId::new(id.0)?;
        if self.entities.contains_key(&id) {
            return Err(SceneError::AlreadyExists(id));
        }
        let parent = parent.filter(|p| self.entities.contains_key(p));
        self.entities.insert(
            id,
            EntityData {
                transform,
                parent,
                active: true,
            },
        );
        self.next_id = self.next_id.max(id.0.saturating_add(1));
        self.event_log.push(WorldEvent::Spawned {
            id,
            transform,
            parent,
        });
        Ok(())
    }

    /// Remove an entity. Its children are re-attached to the root, keeping
    /// their world transforms. Returns the data if it existed.
    pub fn despawn(&mut self, id: EntityId) -> Option<EntityData> {
        if !self.entities.contains_key(&id) {
            return None;
        }
        for child in self.children(id) {
            // Child and parent both exist, so detaching cannot fail.
            let _ = self.set_parent(child, None);
        }
        let data = self.entities.remove(&id)?;
        self.event_log.push(WorldEvent::Despawned {
            id,
            transform: data.transform,
        });
        Some(data)
    }

    /// Get a reference to entity data.
    pub fn get(&self, id: EntityId) -> Option<&EntityData> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Direct children of `id`, in id order.
    pub fn children(&self, id: EntityId) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, d)| d.parent == Some(id))
            .map(|(child, _)| *child)
            .collect()
    }

    /// Update an entity's local transform and log the change.
    pub fn set_transform(&mut self, id: EntityId, new: Transform) -> bool {
        if let Some(data) = self.entities.get_mut(&id) {
            let old = data.transform;
            data.transform = new;
            self.event_log
                .push(WorldEvent::TransformUpdated { id, old, new });
            true
        } else {
            false
        }
    }

    /// World-space transform, composed through the parent chain.
    pub fn world_transform(&self, id: EntityId) -> Option<Transform> {
        let data = self.entities.get(&id)?;
        let mut world = data.transform;
        let mut parent = data.parent;
        while let Some(pid) = parent {
            let Some(p) = self.entities.get(&pid) else {
                break;
            };
            world = p.transform.mul_transform(&world);
            parent = p.parent;
        }
        Some(world)
    }

    /// Set the world-space transform by converting it into the parent's space.
    pub fn set_world_transform(&mut self, id: EntityId, world: Transform) -> bool {
        let Some(data) = self.entities.get(&id) else {
            return false;
        };
        let local = match data.parent.and_then(|p| self.world_transform(p)) {
            Some(parent_world) => parent_world.relative(&world),
            None => world,
        };
        self.set_transform(id, local)
    }

    /// Re-parent an entity while preserving its world transform.
    pub fn set_parent(
        &mut self,
        id: EntityId,
        parent: Option<EntityId>,
    ) -> Result<(), SceneError> {
        let world = self
            .world_transform(id)
            .ok_or(SceneError::EntityNotFound(id))?;
        if let Some(p) = parent {
            if !self.entities.contains_key(&p) {
                return Err(SceneError::EntityNotFound(p));
            }
            if p == id || self.is_ancestor(id, p) {
                return Err(SceneError::ParentCycle {
                    child: id,
                    parent: p,
                });
            }
        }
        let local = match parent.and_then(|p| self.world_transform(p)) {
            Some(parent_world) => parent_world.relative(&world),
            None => world,
        };
        let Some(data) = self.entities.get_mut(&id) else {
            return Err(SceneError::EntityNotFound(id));
        };
        let old = data.parent;
        data.parent = parent;
        data.transform = local;
        tracing::debug!(%id, ?old, new = ?parent, "reparented");
        self.event_log.push(WorldEvent::ParentChanged {
            id,
            old,
            new: parent,
        });
        Ok(())
    }

    /// Toggle the active flag of one entity.
    pub fn set_active(&mut self, id: EntityId, active: bool) -> bool {
        let Some(data) = self.entities.get_mut(&id) else {
            return false;
        };
        if data.active != active {
            data.active = active;
            self.event_log.push(WorldEvent::ActiveChanged { id, active });
        }
        true
    }

    /// An entity is active when it and all of its ancestors are active.
    pub fn is_active_in_hierarchy(&self, id: EntityId) -> bool {
        let mut current = Some(id);
        while let Some(cid) = current {
            match self.entities.get(&cid) {
                Some(d) if d.active => current = d.parent,
                _ => return false,
            }
        }
        true
    }

    /// True when `ancestor` appears in the parent chain of `id`.
    fn is_ancestor(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut current = self.entities.get(&id).and_then(|d| d.parent);
        while let Some(pid) = current {
            if pid == ancestor {
                return true;
            }
            current = self.entities.get(&pid).and_then(|d| d.parent);
        }
        false
    }

    fn allocate_id(&mut self) -> Result<EntityId, SceneError> {
        while self.entities.contains_key(&EntityId(self.next_id)) {
            self.next_id = self.next_id.checked_add(1).ok_or(IdError::Exhausted)?;
        }
        let id = EntityId::new(self.next_id).map_err(|_| IdError::Exhausted)?;
        self.next_id = self.next_id.saturating_add(1);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn world_starts_empty() {
        let w = World::new();
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut w = World::new();
        let a = w.spawn(Transform::default()).unwrap();
        let b = w.spawn(Transform::default()).unwrap();
        assert_eq!(a, EntityId(1));
        assert_eq!(b, EntityId(2));
    }

    #[test]
    fn spawn_and_despawn() {
        let mut w = World::new();
        let id = w.spawn(Transform::default()).unwrap();
        assert_eq!(w.entity_count(), 1);
        assert!(w.get(id).is_some());

        let data = w.despawn(id);
        assert!(data.is_some());
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn reserved_id_rejected() {
        let mut w = World::new();
        let err = w.spawn_with_id(EntityId(0), Transform::default(), None);
        assert!(matches!(err, Err(SceneError::Id(_))));
    }

    #[test]
    fn handle_range_is_not_spawnable() {
        let mut w = World::new();
        for raw in [0xFFFF_FF01, 0xFFFF_FF0D, u32::MAX] {
            assert_eq!(
                w.spawn_with_id(EntityId(raw), Transform::default(), None),
                Err(SceneError::Id(IdError::Reserved(raw)))
            );
        }
        assert_eq!(w.entity_count(), 0);

        // The last usable id spawns, after which allocation is exhausted
        // instead of walking into the reserved range.
        w.spawn_with_id(EntityId::MAX, Transform::default(), None).unwrap();
        assert_eq!(
            w.spawn(Transform::default()),
            Err(SceneError::Id(IdError::Exhausted))
        );
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut w = World::new();
        w.spawn_with_id(EntityId(5), Transform::default(), None).unwrap();
        assert_eq!(
            w.spawn_with_id(EntityId(5), Transform::default(), None),
            Err(SceneError::AlreadyExists(EntityId(5)))
        );
        // Allocation continues past explicitly inserted ids.
        assert_eq!(w.spawn(Transform::default()).unwrap(), EntityId(6));
    }

    #[test]
    fn world_transform_composes_parent_chain() {
        let mut w = World::new();
        let root = w
            .spawn(Transform {
                position: Vec3::new(10.0, 0.0, 0.0),
                rotation: Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
                scale: Vec3::splat(2.0),
            })
            .unwrap();
        let child = w
            .spawn_child(root, Transform::from_position(Vec3::X))
            .unwrap();
        let world = w.world_transform(child).unwrap();
        // +X rotated 90 degrees about Y is -Z, scaled by 2.
        assert!(world.position.abs_diff_eq(Vec3::new(10.0, 0.0, -2.0), 1e-5));
        assert!(world.scale.abs_diff_eq(Vec3::splat(2.0), 1e-6));
    }

    #[test]
    fn set_world_transform_converts_to_local() {
        let mut w = World::new();
        let root = w
            .spawn(Transform::from_position(Vec3::new(0.0, 5.0, 0.0)))
            .unwrap();
        let child = w.spawn_child(root, Transform::default()).unwrap();
        assert!(w.set_world_transform(child, Transform::from_position(Vec3::new(1.0, 1.0, 1.0))));
        let local = w.get(child).unwrap().transform;
        assert!(local.position.abs_diff_eq(Vec3::new(1.0, -4.0, 1.0), 1e-5));
        let world = w.world_transform(child).unwrap();
        assert!(world.position.abs_diff_eq(Vec3::new(1.0, 1.0, 1.0), 1e-5));
    }

    #[test]
    fn reparent_preserves_world_transform() {
        let mut w = World::new();
        let a = w.spawn(Transform::from_position(Vec3::new(3.0, 0.0, 0.0))).unwrap();
        let b = w.spawn(Transform::from_position(Vec3::new(0.0, 2.0, 0.0))).unwrap();
        let before = w.world_transform(b).unwrap();
        w.set_parent(b, Some(a)).unwrap();
        let after = w.world_transform(b).unwrap();
        assert!(before.approx_eq(&after, 1e-5));
    }

    #[test]
    fn parent_cycle_rejected() {
        let mut w = World::new();
        let a = w.spawn(Transform::default()).unwrap();
        let b = w.spawn_child(a, Transform::default()).unwrap();
        assert!(matches!(
            w.set_parent(a, Some(b)),
            Err(SceneError::ParentCycle { .. })
        ));
        assert!(matches!(
            w.set_parent(a, Some(a)),
            Err(SceneError::ParentCycle { .. })
        ));
    }

    #[test]
    fn inactive_parent_hides_child() {
        let mut w = World::new();
        let a = w.spawn(Transform::default()).unwrap();
        let b = w.spawn_child(a, Transform::default()).unwrap();
        assert!(w.is_active_in_hierarchy(b));
        w.set_active(a, false);
        assert!(!w.is_active_in_hierarchy(b));
    }

    #[test]
    fn despawn_detaches_children() {
        let mut w = World::new();
        let a = w.spawn(Transform::from_position(Vec3::X)).unwrap();
        let b = w.spawn_child(a, Transform::from_position(Vec3::Y)).unwrap();
        w.despawn(a);
        let data = w.get(b).unwrap();
        assert_eq!(data.parent, None);
        assert!(data.transform.position.abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-6));
    }

    #[test]
    fn set_transform_logs_event() {
        let mut w = World::new();
        let id = w.spawn(Transform::default()).unwrap();
        let new_t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        assert!(w.set_transform(id, new_t));
        assert_eq!(w.get(id).unwrap().transform.position, new_t.position);
        // spawn + transform update
        assert_eq!(w.events().len(), 2);
    }

    #[test]
    fn drain_events_clears_log() {
        let mut w = World::new();
        w.spawn(Transform::default()).unwrap();
        let events = w.drain_events();
        assert_eq!(events.len(), 1);
        assert!(w.events().is_empty());
    }

    #[test]
    fn btreemap_gives_deterministic_iteration() {
        let mut w = World::new();
        for _ in 0..100 {
            w.spawn(Transform::default()).unwrap();
        }
        let keys: Vec<EntityId> = w.entities().keys().copied().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
