use stagehand_common::{EntityId, Transform};
use stagehand_ecs::{MeshRenderer, Scene, SceneMut};
use stagehand_kernel::SceneError;

/// One entity's local transform before and after an edit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformChange {
    pub id: EntityId,
    pub old: Transform,
    pub new: Transform,
}

impl TransformChange {
    pub fn inverse(&self) -> Self {
        Self {
            id: self.id,
            old: self.new,
            new: self.old,
        }
    }
}

/// Transform changes that form a single undo step, such as one gizmo drag
/// over a multi-selection.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeEdit {
    pub label: &'static str,
    pub changes: Vec<TransformChange>,
}

impl CompositeEdit {
    pub fn new(label: &'static str, changes: Vec<TransformChange>) -> Self {
        Self { label, changes }
    }

    /// Reverse the changes and their order.
    pub fn inverse(&self) -> Self {
        Self {
            label: self.label,
            changes: self.changes.iter().rev().map(TransformChange::inverse).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.changes.iter().map(|c| c.id)
    }
}

/// Everything needed to bring a despawned entity back.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub transform: Transform,
    pub parent: Option<EntityId>,
    pub name: Option<String>,
    pub renderer: Option<MeshRenderer>,
}

impl EntitySnapshot {
    fn capture(scene: &Scene, id: EntityId) -> Option<Self> {
        let data = scene.world.get(id)?;
        Some(Self {
            id,
            transform: data.transform,
            parent: data.parent,
            name: scene.name(id).map(str::to_owned),
            renderer: scene.components.get_mesh_renderer(id).copied(),
        })
    }

    fn restore(&self, scene: &mut Scene) -> Result<(), SceneError> {
        scene
            .world
            .spawn_with_id(self.id, self.transform, self.parent)?;
        if let Some(name) = &self.name {
            scene.components.set_name(self.id, name.clone());
        }
        if let Some(renderer) = self.renderer {
            scene.components.set_mesh_renderer(self.id, renderer);
        }
        Ok(())
    }
}

/// An editing command that can be applied to the scene and reversed.
///
/// Each command carries enough context to undo itself.
#[derive(Debug, Clone, PartialEq)]
pub enum EditCommand {
    /// Spawn an entity. Undo = despawn it.
    Spawn(EntitySnapshot),
    /// Despawn an entity. Undo = re-spawn it with its components.
    Despawn(EntitySnapshot),
    /// Move one entity. Undo = restore the old transform.
    SetTransform(TransformChange),
    /// Several transform changes as one step.
    Composite(CompositeEdit),
}

impl EditCommand {
    /// Produce the inverse command (for undo).
    pub fn inverse(&self) -> Self {
        match self {
            Self::Spawn(snapshot) => Self::Despawn(snapshot.clone()),
            Self::Despawn(snapshot) => Self::Spawn(snapshot.clone()),
            Self::SetTransform(change) => Self::SetTransform(change.inverse()),
            Self::Composite(edit) => Self::Composite(edit.inverse()),
        }
    }
}

/// Errors from edit operations.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Receives every composite edit the editor records.
pub trait EditListener {
    fn on_edit(&mut self, edit: &CompositeEdit);
}

impl<F: FnMut(&CompositeEdit)> EditListener for F {
    fn on_edit(&mut self, edit: &CompositeEdit) {
        self(edit)
    }
}

/// Undo/redo history over a [`Scene`].
///
/// Spawn, despawn and single transform edits apply and record in one call.
/// Gizmo drags mutate the scene live and hand their result to
/// [`Editor::record`] once the drag ends.
#[derive(Default)]
pub struct Editor {
    undo_stack: Vec<EditCommand>,
    redo_stack: Vec<EditCommand>,
    listener: Option<Box<dyn EditListener>>,
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("undo", &self.undo_stack.len())
            .field("redo", &self.redo_stack.len())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the edit notification callback.
    pub fn set_listener(&mut self, listener: impl EditListener + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    fn push(&mut self, command: EditCommand) {
        self.undo_stack.push(command);
        self.redo_stack.clear();
    }

    /// Spawn a mesh entity and push to the undo stack.
    pub fn spawn(
        &mut self,
        scene: &mut Scene,
        name: impl Into<String>,
        transform: Transform,
        renderer: MeshRenderer,
    ) -> Result<EntityId, EditError> {
        let id = scene.spawn_mesh(name, transform, renderer)?;
        let snapshot = EntitySnapshot::capture(scene, id).ok_or(EditError::EntityNotFound(id))?;
        self.push(EditCommand::Spawn(snapshot));
        Ok(id)
    }

    /// Despawn an entity and push to the undo stack.
    pub fn despawn(&mut self, scene: &mut Scene, id: EntityId) -> Result<(), EditError> {
        let snapshot = EntitySnapshot::capture(scene, id).ok_or(EditError::EntityNotFound(id))?;
        scene.despawn(id);
        self.push(EditCommand::Despawn(snapshot));
        Ok(())
    }

    /// Set an entity's local transform and push to the undo stack.
    pub fn set_transform(
        &mut self,
        scene: &mut Scene,
        id: EntityId,
        new: Transform,
    ) -> Result<(), EditError> {
        let old = scene
            .local_transform(id)
            .ok_or(EditError::EntityNotFound(id))?;
        scene.set_local_transform(id, new);
        self.push(EditCommand::SetTransform(TransformChange { id, old, new }));
        Ok(())
    }

    /// Record an already-applied composite edit as one undo step and notify
    /// the listener. Empty edits are ignored.
    pub fn record(&mut self, edit: CompositeEdit) -> bool {
        if edit.is_empty() {
            return false;
        }
        tracing::debug!(label = edit.label, changes = edit.len(), "recorded edit");
        if let Some(listener) = self.listener.as_mut() {
            listener.on_edit(&edit);
        }
        self.push(EditCommand::Composite(edit));
        true
    }

    /// Undo the last edit. Returns true if an operation was undone.
    pub fn undo(&mut self, scene: &mut Scene) -> bool {
        let Some(cmd) = self.undo_stack.pop() else {
            return false;
        };
        if let Err(err) = apply_command(scene, &cmd.inverse()) {
            tracing::warn!(%err, "undo could not be fully applied");
        }
        self.redo_stack.push(cmd);
        true
    }

    /// Redo the last undone edit. Returns true if an operation was redone.
    pub fn redo(&mut self, scene: &mut Scene) -> bool {
        let Some(cmd) = self.redo_stack.pop() else {
            return false;
        };
        if let Err(err) = apply_command(scene, &cmd) {
            tracing::warn!(%err, "redo could not be fully applied");
        }
        self.undo_stack.push(cmd);
        true
    }

    /// The command the next undo would revert.
    pub fn last(&self) -> Option<&EditCommand> {
        self.undo_stack.last()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Drop all history, for example after loading a different scene.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

fn apply_command(scene: &mut Scene, cmd: &EditCommand) -> Result<(), EditError> {
    match cmd {
        EditCommand::Spawn(snapshot) => snapshot.restore(scene)?,
        EditCommand::Despawn(snapshot) => {
            if !scene.despawn(snapshot.id) {
                return Err(EditError::EntityNotFound(snapshot.id));
            }
        }
        EditCommand::SetTransform(change) => {
            if !scene.set_local_transform(change.id, change.new) {
                return Err(EditError::EntityNotFound(change.id));
            }
        }
        EditCommand::Composite(edit) => {
            let mut missing = None;
            for change in &edit.changes {
                if !scene.set_local_transform(change.id, change.new) {
                    missing.get_or_insert(change.id);
                }
            }
            if let Some(id) = missing {
                return Err(EditError::EntityNotFound(id));
            }
        }
    }
    Ok(())
}
