//! Reusable entity blueprints and their append-only registry.
//!
//! A [`Template`] is a portable snapshot of an authored entity tree, much
//! like a prefab: it stores names, hierarchy, per-entity state and the
//! LocalIds assigned by [`assign_ids`](crate::assign_ids). Templates are
//! registered once in a [`TemplateRegistry`] and never mutated afterwards.
//!
//! # Example
//!
//! ```ignore
//! let mut authoring = World::new();
//! let root = authoring.spawn("crate");
//! authoring.spawn_child(root, "lid");
//! assign_ids(&mut authoring, root, |_| false)?;
//!
//! let mut registry = TemplateRegistry::new();
//! let id = registry.register(&Arc::new(Template::extract(&authoring, root)));
//!
//! let instance = world.instantiate(&registry, id);
//! ```

use std::sync::Arc;

use crate::entity::Entity;
use crate::world::{EntityState, World};

/// Stable, append-only identifier of a registered [`Template`].
///
/// Ids are handed out in registration order and never reassigned, even
/// after [`TemplateRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub u32);

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entity of a template snapshot.
pub(crate) struct TemplateNode {
    pub(crate) name: String,
    /// Index of the parent node. `None` only for the root (index 0).
    pub(crate) parent: Option<usize>,
    pub(crate) local_id: i32,
    /// Set when this node is the root of a nested template. Its subtree is
    /// not part of the snapshot; it is instantiated from the registry.
    pub(crate) nested: Option<TemplateId>,
    pub(crate) state: Option<Box<dyn EntityState>>,
}

/// An authored entity blueprint.
///
/// Nodes are stored in depth-first pre-order, so every parent precedes its
/// children. Index 0 is the root.
pub struct Template {
    name: String,
    nodes: Vec<TemplateNode>,
}

impl Template {
    /// Snapshots the entity tree under `root`.
    ///
    /// Descendants that are themselves template roots (with a registered
    /// template id) are recorded as nested template references; the walk
    /// does not descend into them.
    pub fn extract(world: &World, root: Entity) -> Self {
        let mut nodes = Vec::new();
        if world.is_alive(root) {
            extract_node(world, root, None, &mut nodes);
        }
        Template {
            name: world.name(root).unwrap_or_default().to_owned(),
            nodes,
        }
    }

    /// The name of the root entity this template was extracted from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of snapshot nodes, root and nested-template references included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }
}

fn extract_node(world: &World, entity: Entity, parent: Option<usize>, nodes: &mut Vec<TemplateNode>) {
    let identity = world.identity(entity);
    let index = nodes.len();
    let nested = match identity {
        Some(id) if parent.is_some() && id.is_template_root() => id.template_id(),
        _ => None,
    };

    nodes.push(TemplateNode {
        name: world.name(entity).unwrap_or_default().to_owned(),
        parent,
        local_id: identity.map_or(crate::identity::UNASSIGNED_LOCAL_ID, |id| id.local_id()),
        nested,
        state: world.state_box(entity).map(|s| s.clone_box()),
    });

    if nested.is_some() {
        return;
    }
    for &child in world.children(entity) {
        extract_node(world, child, Some(index), nodes);
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// Append-only table mapping [`TemplateId`] to registered templates.
///
/// Templates are compared by pointer identity, so registering the same
/// `Arc<Template>` twice returns the same id.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: Vec<Option<Arc<Template>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template, returning its id.
    ///
    /// Idempotent: a template that is already registered keeps its id.
    pub fn register(&mut self, template: &Arc<Template>) -> TemplateId {
        if let Some(id) = self.id_of(template) {
            return id;
        }
        let id = TemplateId(self.templates.len() as u32);
        self.templates.push(Some(Arc::clone(template)));
        log::debug!("Registered template '{}' as {id}", template.name());
        id
    }

    /// Looks up a template. Unknown ids and holes are a miss, not an error.
    pub fn resolve(&self, id: TemplateId) -> Option<&Arc<Template>> {
        self.templates.get(id.0 as usize).and_then(|t| t.as_ref())
    }

    /// Returns the id under which `template` is registered.
    pub fn id_of(&self, template: &Arc<Template>) -> Option<TemplateId> {
        self.templates
            .iter()
            .position(|t| t.as_ref().is_some_and(|t| Arc::ptr_eq(t, template)))
            .map(|i| TemplateId(i as u32))
    }

    /// Removes a template, leaving a hole. The id is never handed out again.
    pub fn remove(&mut self, id: TemplateId) -> Option<Arc<Template>> {
        self.templates.get_mut(id.0 as usize).and_then(|t| t.take())
    }

    /// Number of slots, holes included. This is also the next id.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Iterates over registered templates, skipping holes.
    pub fn iter(&self) -> impl Iterator<Item = (TemplateId, &Arc<Template>)> + '_ {
        self.templates
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (TemplateId(i as u32), t)))
    }
}
