//! Stable per-entity identity and the four-part composite id.
//!
//! Every entity carries a [`StableIdentity`]. Entities inside a template
//! instance have a LocalId (their position in the template's child set,
//! assigned at authoring time by [`assign_ids`]) and a RuntimeReference, a
//! short string generated lazily once per process. Together with the
//! owning template's id and the instance root's RuntimeReference they form
//! a [`CompositeId`]:
//!
//! ```text
//! <templateId>.<instanceRuntimeRef>.<localId>.<entityRuntimeRef>
//! ```
//!
//! A template root addresses itself with LocalId `-1` and its own
//! RuntimeReference in both reference slots.
//!
//! A template nested inside another template's instance is addressed
//! through the outermost instance: the LocalId slot holds the path of
//! LocalIds down to the entity, joined with `/` (`2/0` is child 0 of the
//! nested root holding LocalId 2).

use std::collections::HashMap;
use std::str::FromStr;

use crate::entity::Entity;
use crate::template::TemplateId;
use crate::world::World;

/// LocalId of an entity that has not been assigned one yet. Also the
/// LocalId used by template roots inside a [`CompositeId`].
pub const UNASSIGNED_LOCAL_ID: i32 = -1;

/// Errors raised by identity assignment and parsing.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("{0} is not alive")]
    NotAlive(Entity),
    #[error("overwriting LocalId {local_id} of {entity} was declined ({summary})")]
    OverwriteDeclined {
        entity: Entity,
        local_id: i32,
        summary: AssignSummary,
    },
    #[error("invalid runtime reference '{0}': must be non-empty and contain no '.'")]
    InvalidRuntimeRef(String),
    #[error("malformed composite id '{0}'")]
    MalformedCompositeId(String),
}

/// Identity data attached to every entity in a [`World`].
///
/// Carries data only; spawning and destruction are done by the world.
#[derive(Debug, Clone)]
pub struct StableIdentity {
    pub(crate) local_id: i32,
    pub(crate) template_id: Option<TemplateId>,
    pub(crate) is_template_root: bool,
    pub(crate) parent_template: Option<Entity>,
    pub(crate) children: Vec<Entity>,
    pub(crate) runtime_ref: Option<String>,
}

impl StableIdentity {
    /// Position inside the owning template's child set, or
    /// [`UNASSIGNED_LOCAL_ID`].
    pub fn local_id(&self) -> i32 {
        self.local_id
    }

    /// Id of the owning template. Stored on roots and children alike so a
    /// damaged registry link can be rebuilt from entity data.
    pub fn template_id(&self) -> Option<TemplateId> {
        self.template_id
    }

    pub fn is_template_root(&self) -> bool {
        self.is_template_root
    }

    /// The owning template root (children only).
    pub fn parent_template(&self) -> Option<Entity> {
        self.parent_template
    }

    /// The template's children ordered by assignment (roots only).
    pub fn children(&self) -> &[Entity] {
        &self.children
    }

    /// The runtime reference, if one was generated or loaded.
    pub fn runtime_ref(&self) -> Option<&str> {
        self.runtime_ref.as_deref()
    }

    /// Overwrites the runtime reference, e.g. to match a loaded document.
    pub fn set_runtime_ref(&mut self, runtime_ref: &str) -> Result<(), IdentityError> {
        validate_runtime_ref(runtime_ref)?;
        self.runtime_ref = Some(runtime_ref.to_owned());
        Ok(())
    }

    /// Sets the LocalId directly. Authoring tools normally use
    /// [`assign_ids`] instead.
    pub fn set_local_id(&mut self, local_id: i32) {
        self.local_id = local_id;
    }

    /// Marks this entity as the root of template `id`.
    pub fn mark_template_root(&mut self, id: Option<TemplateId>) {
        self.is_template_root = true;
        self.template_id = id;
        self.parent_template = None;
        self.local_id = UNASSIGNED_LOCAL_ID;
    }
}

impl Default for StableIdentity {
    fn default() -> Self {
        Self {
            local_id: UNASSIGNED_LOCAL_ID,
            template_id: None,
            is_template_root: false,
            parent_template: None,
            children: Vec::new(),
            runtime_ref: None,
        }
    }
}

pub(crate) fn validate_runtime_ref(runtime_ref: &str) -> Result<(), IdentityError> {
    if runtime_ref.is_empty() || runtime_ref.contains('.') {
        return Err(IdentityError::InvalidRuntimeRef(runtime_ref.to_owned()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CompositeId
// ---------------------------------------------------------------------------

/// Four-part id addressing one live entity instance within one document.
///
/// `template_id` and `instance_ref` always name the outermost instance.
/// `nested_path` lists the LocalIds of the nested template roots between
/// that instance and the entity; it is empty for direct children.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeId {
    pub template_id: TemplateId,
    pub instance_ref: String,
    pub nested_path: Vec<i32>,
    pub local_id: i32,
    pub entity_ref: String,
}

impl CompositeId {
    /// Whether this id addresses a template root rather than a child.
    pub fn is_root(&self) -> bool {
        self.local_id < 0 && self.nested_path.is_empty()
    }
}

impl std::fmt::Display for CompositeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.", self.template_id, self.instance_ref)?;
        for local in &self.nested_path {
            write!(f, "{local}/")?;
        }
        write!(f, "{}.{}", self.local_id, self.entity_ref)
    }
}

impl FromStr for CompositeId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || IdentityError::MalformedCompositeId(s.to_owned());
        let parts: Vec<&str> = s.split('.').collect();
        let [template_id, instance_ref, local_id, entity_ref] = parts[..] else {
            return Err(malformed());
        };
        if instance_ref.is_empty() || entity_ref.is_empty() {
            return Err(malformed());
        }
        let mut path = local_id
            .split('/')
            .map(|segment| segment.parse::<i32>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>, _>>()?;
        let local_id = path.pop().ok_or_else(malformed)?;
        if path.iter().any(|&l| l < 0) || (!path.is_empty() && local_id < 0) {
            return Err(malformed());
        }
        Ok(CompositeId {
            template_id: TemplateId(template_id.parse().map_err(|_| malformed())?),
            instance_ref: instance_ref.to_owned(),
            nested_path: path,
            local_id,
            entity_ref: entity_ref.to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Runtime reference generators
// ---------------------------------------------------------------------------

/// Source of fresh runtime references.
///
/// Generated references must be non-empty and must not contain `.`.
pub trait RuntimeRefGenerator: Send {
    fn next_ref(&mut self) -> String;
}

/// Default generator: 64 random bits as 16 lowercase hex digits.
#[derive(Debug, Default)]
pub struct RandomRefGenerator;

impl RuntimeRefGenerator for RandomRefGenerator {
    fn next_ref(&mut self) -> String {
        format!("{:016x}", rand::random::<u64>())
    }
}

/// Deterministic generator producing `<prefix>0`, `<prefix>1`, ...
///
/// Only safe when no loaded document can contain the same references,
/// which makes it suited to tests and offline tools.
#[derive(Debug)]
pub struct SequentialRefGenerator {
    prefix: String,
    next: u64,
}

impl SequentialRefGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }
}

impl RuntimeRefGenerator for SequentialRefGenerator {
    fn next_ref(&mut self) -> String {
        let id = self.next;
        self.next += 1;
        format!("{}{id}", self.prefix)
    }
}

// ---------------------------------------------------------------------------
// LocalId assignment
// ---------------------------------------------------------------------------

/// Why an existing LocalId cannot be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Another entity earlier in the walk already holds the id.
    Duplicate { other: Entity },
    /// The entity claims to belong to a different live template root.
    ForeignOwner { owner: Entity },
}

/// An inconsistent LocalId found by [`assign_ids`].
#[derive(Debug, Clone, Copy)]
pub struct IdConflict {
    pub entity: Entity,
    pub local_id: i32,
    pub reason: ConflictReason,
}

/// Counts of what [`assign_ids`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignSummary {
    /// Previously unassigned entities that received an id.
    pub assigned: usize,
    /// Consistent ids left untouched.
    pub kept: usize,
    /// Conflicting ids overwritten after confirmation.
    pub reassigned: usize,
}

impl std::fmt::Display for AssignSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} assigned, {} kept, {} reassigned",
            self.assigned, self.kept, self.reassigned
        )
    }
}

/// Assigns LocalIds to every entity owned by the template root `root`.
///
/// Walks the subtree depth-first. A nested template root receives a LocalId
/// like any other child and keeps its own template id, but the walk does
/// not descend into it. Unassigned entities receive the lowest free id.
/// Consistent existing ids are kept. For each inconsistent id, `confirm`
/// is asked whether it may be overwritten; declining aborts the walk and
/// leaves the ids assigned so far in place.
///
/// `root` is marked as a template root and its child list is rebuilt in
/// walk order.
pub fn assign_ids(
    world: &mut World,
    root: Entity,
    mut confirm: impl FnMut(&IdConflict) -> bool,
) -> Result<AssignSummary, IdentityError> {
    let Some(root_identity) = world.identity_mut(root) else {
        return Err(IdentityError::NotAlive(root));
    };
    let template_id = root_identity.template_id;
    root_identity.mark_template_root(template_id);

    let mut owned = Vec::new();
    collect_owned(world, root, &mut owned);

    // First sweep classifies without mutating, so ids held by later
    // entities are known before anything is handed out.
    let mut used: HashMap<i32, Entity> = HashMap::new();
    let mut conflicts: HashMap<Entity, ConflictReason> = HashMap::new();
    for &entity in &owned {
        let Some(identity) = world.identity(entity) else {
            continue;
        };
        let local_id = identity.local_id;
        if local_id < 0 {
            continue;
        }
        if let Some(&other) = used.get(&local_id) {
            conflicts.insert(entity, ConflictReason::Duplicate { other });
            continue;
        }
        if let Some(owner) = identity.parent_template {
            if owner != root && world.is_alive(owner) {
                conflicts.insert(entity, ConflictReason::ForeignOwner { owner });
                continue;
            }
        }
        used.insert(local_id, entity);
    }

    let mut summary = AssignSummary::default();
    let mut next_free = 0;
    let mut children = Vec::with_capacity(owned.len());

    for &entity in &owned {
        let local_id = world
            .identity(entity)
            .map_or(UNASSIGNED_LOCAL_ID, |i| i.local_id);

        let new_id = if let Some(&reason) = conflicts.get(&entity) {
            let conflict = IdConflict {
                entity,
                local_id,
                reason,
            };
            if !confirm(&conflict) {
                log::warn!(
                    "LocalId assignment under {root} aborted at {entity} ({reason:?}); {summary}"
                );
                set_template_children(world, root, children);
                return Err(IdentityError::OverwriteDeclined {
                    entity,
                    local_id,
                    summary,
                });
            }
            summary.reassigned += 1;
            Some(take_free(&mut used, &mut next_free, entity))
        } else if local_id < 0 {
            summary.assigned += 1;
            Some(take_free(&mut used, &mut next_free, entity))
        } else {
            summary.kept += 1;
            None
        };

        if let Some(identity) = world.identity_mut(entity) {
            if let Some(id) = new_id {
                identity.local_id = id;
            }
            identity.parent_template = Some(root);
            if !identity.is_template_root {
                identity.template_id = template_id;
            }
        }
        children.push(entity);
    }

    set_template_children(world, root, children);
    log::debug!("Assigned LocalIds under {root}: {summary}");
    Ok(summary)
}

fn take_free(used: &mut HashMap<i32, Entity>, next_free: &mut i32, entity: Entity) -> i32 {
    while used.contains_key(next_free) {
        *next_free += 1;
    }
    used.insert(*next_free, entity);
    *next_free
}

fn set_template_children(world: &mut World, root: Entity, children: Vec<Entity>) {
    if let Some(identity) = world.identity_mut(root) {
        identity.children = children;
    }
}

/// Depth-first pre-order walk. Nested template roots are collected but not
/// descended into; their own children belong to the nested template.
fn collect_owned(world: &World, entity: Entity, out: &mut Vec<Entity>) {
    for &child in world.children(entity) {
        out.push(child);
        if !world.identity(child).is_some_and(|i| i.is_template_root) {
            collect_owned(world, child, out);
        }
    }
}
