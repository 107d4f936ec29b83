use stagehand_common::EntityId;
use stagehand_ecs::SceneQuery;

/// Ordered set of selected entities plus the active one that anchors the
/// gizmo pivot.
///
/// Insertion order is kept; the active id is always a member when the set is
/// non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: Vec<EntityId>,
    active: Option<EntityId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection with a single entity.
    pub fn select(&mut self, id: EntityId) {
        self.ids.clear();
        self.ids.push(id);
        self.active = Some(id);
    }

    /// Replace the selection with `ids`; the first becomes active.
    pub fn select_all(&mut self, ids: impl IntoIterator<Item = EntityId>) {
        self.clear();
        for id in ids {
            if !self.ids.contains(&id) {
                self.ids.push(id);
            }
        }
        self.active = self.ids.first().copied();
    }

    /// Add to the selection and make it active.
    pub fn add(&mut self, id: EntityId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
        self.active = Some(id);
    }

    /// Add if absent, remove if present.
    pub fn toggle(&mut self, id: EntityId) {
        if self.contains(id) {
            self.remove(id);
        } else {
            self.add(id);
        }
    }

    /// Remove `id`. Removing the active entity promotes the most recently
    /// added remaining one.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(pos) = self.ids.iter().position(|x| *x == id) else {
            return false;
        };
        self.ids.remove(pos);
        if self.active == Some(id) {
            self.active = self.ids.last().copied();
        }
        true
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.active = None;
    }

    /// Make a member the active entity; non-members are ignored.
    pub fn set_active(&mut self, id: EntityId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.active = Some(id);
        true
    }

    pub fn active(&self) -> Option<EntityId> {
        self.active
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Drop entities the scene no longer contains. Returns how many were
    /// removed.
    pub fn retain_live<S: SceneQuery + ?Sized>(&mut self, scene: &S) -> usize {
        let dead: Vec<EntityId> = self
            .ids
            .iter()
            .copied()
            .filter(|id| !scene.contains(*id))
            .collect();
        for id in &dead {
            self.remove(*id);
        }
        dead.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_common::Transform;
    use stagehand_ecs::{MaterialId, MeshKind, MeshRenderer, Scene};

    const A: EntityId = EntityId(1);
    const B: EntityId = EntityId(2);
    const C: EntityId = EntityId(3);

    #[test]
    fn select_replaces() {
        let mut sel = Selection::new();
        sel.add(A);
        sel.add(B);
        sel.select(C);
        assert_eq!(sel.ids(), &[C]);
        assert_eq!(sel.active(), Some(C));
    }

    #[test]
    fn add_keeps_order_and_activates() {
        let mut sel = Selection::new();
        sel.add(A);
        sel.add(B);
        sel.add(A);
        assert_eq!(sel.ids(), &[A, B]);
        assert_eq!(sel.active(), Some(A));
    }

    #[test]
    fn removing_active_promotes_last_added() {
        let mut sel = Selection::new();
        sel.add(A);
        sel.add(B);
        sel.add(C);
        sel.set_active(B);
        assert!(sel.remove(B));
        assert_eq!(sel.active(), Some(C));
        assert!(sel.remove(C));
        assert_eq!(sel.active(), Some(A));
        assert!(sel.remove(A));
        assert_eq!(sel.active(), None);
        assert!(!sel.remove(A));
    }

    #[test]
    fn toggle_and_set_active() {
        let mut sel = Selection::new();
        sel.toggle(A);
        sel.toggle(B);
        sel.toggle(A);
        assert_eq!(sel.ids(), &[B]);
        assert!(!sel.set_active(A));
        assert_eq!(sel.active(), Some(B));
    }

    #[test]
    fn select_all_dedups() {
        let mut sel = Selection::new();
        sel.select_all([B, A, B]);
        assert_eq!(sel.ids(), &[B, A]);
        assert_eq!(sel.active(), Some(B));
        sel.select_all(std::iter::empty());
        assert!(sel.is_empty());
        assert_eq!(sel.active(), None);
    }

    #[test]
    fn retain_live_drops_despawned() {
        let mut scene = Scene::new();
        let cube = MeshRenderer::primitive(MeshKind::Cube, MaterialId(1));
        let a = scene.spawn_mesh("a", Transform::default(), cube).unwrap();
        let b = scene.spawn_mesh("b", Transform::default(), cube).unwrap();
        let mut sel = Selection::new();
        sel.add(a);
        sel.add(b);
        scene.despawn(b);
        assert_eq!(sel.retain_live(&scene), 1);
        assert_eq!(sel.ids(), &[a]);
        assert_eq!(sel.active(), Some(a));
    }
}
