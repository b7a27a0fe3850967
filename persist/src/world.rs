//! Host entity container used by the persistence engine.
//!
//! The [`World`] owns entities, their hierarchy, their [`StableIdentity`]
//! and an optional piece of persistent per-entity state. It provides the
//! two primitives the serializer needs from a host: instantiate-from-template
//! and destroy-instance.

use std::any::Any;
use std::sync::Arc;

use crate::entity::{Entity, EntityAllocator};
use crate::identity::{
    validate_runtime_ref, CompositeId, RandomRefGenerator, RuntimeRefGenerator, StableIdentity,
    UNASSIGNED_LOCAL_ID,
};
use crate::serialize::Persist;
use crate::template::{TemplateId, TemplateRegistry};

/// Type-erased persistent state attached to an entity.
///
/// Implemented for every `Persist + Clone + 'static` type, so any derived
/// state struct can be stored on an entity and cloned out of a template.
pub trait EntityState: Persist + Any {
    fn clone_box(&self) -> Box<dyn EntityState>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Persist + Clone + 'static> EntityState for T {
    fn clone_box(&self) -> Box<dyn EntityState> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct Node {
    name: String,
    parent: Option<Entity>,
    children: Vec<Entity>,
    identity: StableIdentity,
    state: Option<Box<dyn EntityState>>,
}

/// Container of entities with hierarchy, identity and state.
///
/// Not thread-safe by design of the surrounding engine: one world is driven
/// from one thread, and save/load borrow it mutably for their duration.
pub struct World {
    entities: EntityAllocator,
    nodes: Vec<Option<Node>>,
    ref_generator: Box<dyn RuntimeRefGenerator>,
}

impl World {
    /// Creates an empty world using [`RandomRefGenerator`].
    pub fn new() -> Self {
        Self::with_ref_generator(RandomRefGenerator)
    }

    /// Creates an empty world with a custom runtime-reference generator.
    pub fn with_ref_generator(generator: impl RuntimeRefGenerator + 'static) -> Self {
        Self {
            entities: EntityAllocator::new(),
            nodes: Vec::new(),
            ref_generator: Box::new(generator),
        }
    }

    // -- Lifecycle --

    /// Spawns a root-level entity.
    pub fn spawn(&mut self, name: impl Into<String>) -> Entity {
        let entity = self.entities.allocate();
        let idx = entity.index() as usize;
        if self.nodes.len() <= idx {
            self.nodes.resize_with(idx + 1, || None);
        }
        self.nodes[idx] = Some(Node {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            identity: StableIdentity::default(),
            state: None,
        });
        entity
    }

    /// Spawns an entity under `parent`. A dead parent yields a root-level
    /// entity.
    pub fn spawn_child(&mut self, parent: Entity, name: impl Into<String>) -> Entity {
        let entity = self.spawn(name);
        if !self.set_parent(entity, Some(parent)) {
            log::warn!("spawn_child: parent {parent} is not alive, {entity} spawned at root");
        }
        entity
    }

    /// Re-parents `child`. Returns `false` if either entity is dead or the
    /// move would create a cycle.
    pub fn set_parent(&mut self, child: Entity, parent: Option<Entity>) -> bool {
        if !self.is_alive(child) {
            return false;
        }
        if let Some(parent) = parent {
            if !self.is_alive(parent) || self.is_ancestor_or_self(child, parent) {
                return false;
            }
        }

        if let Some(old) = self.node(child).and_then(|n| n.parent) {
            if let Some(node) = self.node_mut(old) {
                node.children.retain(|&c| c != child);
            }
        }
        if let Some(parent) = parent {
            if let Some(node) = self.node_mut(parent) {
                node.children.push(child);
            }
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = parent;
        }
        true
    }

    fn is_ancestor_or_self(&self, ancestor: Entity, mut entity: Entity) -> bool {
        loop {
            if entity == ancestor {
                return true;
            }
            match self.parent(entity) {
                Some(parent) => entity = parent,
                None => return false,
            }
        }
    }

    /// Destroys `entity` and its whole subtree.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.set_parent(entity, None);

        let mut subtree = vec![entity];
        let mut i = 0;
        while i < subtree.len() {
            subtree.extend_from_slice(self.children(subtree[i]));
            i += 1;
        }

        for &e in &subtree {
            let owner = self.identity(e).and_then(|id| id.parent_template);
            if let Some(owner) = owner {
                if let Some(node) = self.node_mut(owner) {
                    node.identity.children.retain(|&c| c != e);
                }
            }
        }
        for e in subtree {
            self.nodes[e.index() as usize] = None;
            self.entities.deallocate(e);
        }
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of alive entities.
    pub fn len(&self) -> usize {
        self.entities.count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over alive entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter_alive()
    }

    // -- Node data --

    fn node(&self, entity: Entity) -> Option<&Node> {
        if !self.is_alive(entity) {
            return None;
        }
        self.nodes.get(entity.index() as usize)?.as_ref()
    }

    fn node_mut(&mut self, entity: Entity) -> Option<&mut Node> {
        if !self.is_alive(entity) {
            return None;
        }
        self.nodes.get_mut(entity.index() as usize)?.as_mut()
    }

    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.node(entity).map(|n| n.name.as_str())
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.node(entity).and_then(|n| n.parent)
    }

    /// Hierarchy children. Empty for dead entities.
    pub fn children(&self, entity: Entity) -> &[Entity] {
        self.node(entity).map_or(&[], |n| n.children.as_slice())
    }

    pub fn identity(&self, entity: Entity) -> Option<&StableIdentity> {
        self.node(entity).map(|n| &n.identity)
    }

    pub fn identity_mut(&mut self, entity: Entity) -> Option<&mut StableIdentity> {
        self.node_mut(entity).map(|n| &mut n.identity)
    }

    // -- State --

    /// Attaches persistent state, replacing any previous state.
    pub fn insert_state<T: EntityState>(&mut self, entity: Entity, state: T) -> bool {
        match self.node_mut(entity) {
            Some(node) => {
                node.state = Some(Box::new(state));
                true
            }
            None => false,
        }
    }

    pub fn state<T: EntityState>(&self, entity: Entity) -> Option<&T> {
        self.node(entity)?.state.as_ref()?.as_any().downcast_ref()
    }

    pub fn state_mut<T: EntityState>(&mut self, entity: Entity) -> Option<&mut T> {
        self.node_mut(entity)?.state.as_mut()?.as_any_mut().downcast_mut()
    }

    pub(crate) fn state_box(&self, entity: Entity) -> Option<&dyn EntityState> {
        self.node(entity)?.state.as_deref()
    }

    /// Detaches the state so it can be (de)serialized while the world is
    /// borrowed by the serializer. Pair with [`restore_state`](Self::restore_state).
    pub(crate) fn take_state(&mut self, entity: Entity) -> Option<Box<dyn EntityState>> {
        self.node_mut(entity)?.state.take()
    }

    pub(crate) fn restore_state(&mut self, entity: Entity, state: Box<dyn EntityState>) {
        if let Some(node) = self.node_mut(entity) {
            node.state = Some(state);
        }
    }

    // -- Identity --

    /// Returns the runtime reference of `entity`, generating it on first use.
    pub fn runtime_ref(&mut self, entity: Entity) -> Option<String> {
        if let Some(existing) = self.identity(entity)?.runtime_ref.clone() {
            return Some(existing);
        }
        let generated = self.ref_generator.next_ref();
        if let Err(e) = validate_runtime_ref(&generated) {
            log::error!("Runtime reference generator produced an unusable value: {e}");
            return None;
        }
        self.identity_mut(entity)?.runtime_ref = Some(generated.clone());
        Some(generated)
    }

    /// Builds the composite id of `entity`.
    ///
    /// Returns `None` for dead entities and for entities that are not part
    /// of a template instance (no template id, no owning root, or no
    /// LocalId). Entities inside nested templates are addressed through the
    /// outermost instance.
    pub fn composite_id(&mut self, entity: Entity) -> Option<CompositeId> {
        let identity = self.identity(entity)?;
        if identity.is_template_root && identity.parent_template.is_none() {
            let template_id = identity.template_id?;
            let runtime_ref = self.runtime_ref(entity)?;
            return Some(CompositeId {
                template_id,
                instance_ref: runtime_ref.clone(),
                nested_path: Vec::new(),
                local_id: UNASSIGNED_LOCAL_ID,
                entity_ref: runtime_ref,
            });
        }

        let local_id = identity.local_id;
        let mut owner = identity.parent_template?;
        if local_id < 0 {
            return None;
        }
        let mut nested_path = Vec::new();
        // Bounded by the entity count so a corrupted owner chain cannot loop.
        for _ in 0..self.len() {
            let owner_identity = self.identity(owner)?;
            match owner_identity.parent_template {
                Some(outer) if owner_identity.is_template_root => {
                    if owner_identity.local_id < 0 {
                        return None;
                    }
                    nested_path.push(owner_identity.local_id);
                    owner = outer;
                }
                _ => break,
            }
        }
        nested_path.reverse();

        let template_id = self.identity(owner)?.template_id?;
        let instance_ref = self.runtime_ref(owner)?;
        let entity_ref = self.runtime_ref(entity)?;
        Some(CompositeId {
            template_id,
            instance_ref,
            nested_path,
            local_id,
            entity_ref,
        })
    }

    /// Finds the child of template root `root` holding `local_id`.
    pub fn resolve_local(&self, root: Entity, local_id: i32) -> Option<Entity> {
        self.identity(root)?
            .children
            .iter()
            .copied()
            .find(|&c| self.identity(c).is_some_and(|i| i.local_id == local_id))
    }

    // -- Templates --

    /// Spawns a full instance of template `id`, children and nested
    /// templates included, and returns its root.
    ///
    /// Returns `None` if the id is unknown or the template is empty.
    pub fn instantiate(&mut self, registry: &TemplateRegistry, id: TemplateId) -> Option<Entity> {
        let template = Arc::clone(registry.resolve(id)?);
        let mut spawned: Vec<Entity> = Vec::with_capacity(template.node_count());
        let mut owned_children = Vec::new();

        for node in template.nodes() {
            let parent = node.parent.and_then(|p| spawned.get(p).copied());
            let root = spawned.first().copied();
            let entity = match node.nested {
                Some(nested_id) => self.instantiate(registry, nested_id).unwrap_or_else(|| {
                    log::warn!(
                        "Template {id} nests unknown template {nested_id}; '{}' spawned empty",
                        node.name
                    );
                    self.spawn(node.name.clone())
                }),
                None => self.spawn(node.name.clone()),
            };
            if parent.is_some() {
                self.set_parent(entity, parent);
            }

            if let Some(n) = self.node_mut(entity) {
                if node.nested.is_none() {
                    n.state = node.state.as_ref().map(|s| s.clone_box());
                    n.identity.template_id = Some(id);
                }
                n.identity.local_id = match root {
                    Some(_) => node.local_id,
                    None => UNASSIGNED_LOCAL_ID,
                };
                match root {
                    None => n.identity.is_template_root = true,
                    Some(root) => {
                        n.identity.parent_template = Some(root);
                        if node.local_id >= 0 {
                            owned_children.push(entity);
                        }
                    }
                }
            }
            spawned.push(entity);
        }

        let root = *spawned.first()?;
        if let Some(identity) = self.identity_mut(root) {
            identity.children = owned_children;
        }
        log::debug!(
            "Instantiated template {id} '{}' as {root} ({} entities)",
            template.name(),
            spawned.len()
        );
        Some(root)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
