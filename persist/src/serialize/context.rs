//! Write and read contexts handed to [`Persist`](super::Persist) hooks.
//!
//! [`SerializeContext`] accumulates the entries of one document scope.
//! [`DeserializeContext`] gives keyed access to one scope and carries the
//! reconciliation algorithm that maps composite ids in the document to live
//! entities, spawning template instances on demand.

use std::str::FromStr;

use super::error::{DeserializeError, SerializeError};
use super::field::{Field, OwnedField};
use super::report::Diagnostic;
use super::serializer::Session;
use super::value::Value;
use crate::config::PersistConfig;
use crate::entity::Entity;
use crate::identity::CompositeId;
use crate::template::TemplateRegistry;
use crate::world::World;

/// Key holding the composite id inside an owned entity's encoding.
pub const OWNED_ID_KEY: &str = "@id";

// ---------------------------------------------------------------------------
// SerializeContext
// ---------------------------------------------------------------------------

/// Context for writing one document scope.
pub struct SerializeContext<'a> {
    world: &'a mut World,
    session: &'a mut Session,
    fields: Vec<(String, Value)>,
    depth: usize,
}

impl<'a> SerializeContext<'a> {
    pub(crate) fn new(world: &'a mut World, session: &'a mut Session) -> Self {
        Self {
            world,
            session,
            fields: Vec::new(),
            depth: 0,
        }
    }

    pub fn world(&self) -> &World {
        self.world
    }

    /// The schema version being written.
    pub fn version(&self) -> u32 {
        self.session.version()
    }

    /// Nesting depth of this scope; the document root is 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Writes `value` under `key`. Values that encode to nothing (an empty
    /// `Option`, a despawned reference) leave the key absent.
    pub fn write<T: Field>(&mut self, key: &str, value: &T) -> Result<(), SerializeError> {
        if let Some(encoded) = value.write_value(self)? {
            self.write_value(key, encoded);
        }
        Ok(())
    }

    /// Writes an owning entity field: its composite id plus its full state.
    pub fn write_owned<T: OwnedField + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
    ) -> Result<(), SerializeError> {
        if let Some(encoded) = value.write_owned(self)? {
            self.write_value(key, encoded);
        }
        Ok(())
    }

    /// Writes a pre-built value. The first write of a key in a scope wins.
    pub fn write_value(&mut self, key: &str, value: Value) {
        if self.fields.iter().any(|(k, _)| k == key) {
            log::debug!("Key '{key}' already written in this scope, keeping the first value");
            return;
        }
        self.fields.push((key.to_owned(), value));
    }

    /// Runs `f` against a fresh nested scope and returns it as a map.
    pub fn nested_value(
        &mut self,
        f: impl FnOnce(&mut SerializeContext<'_>) -> Result<(), SerializeError>,
    ) -> Result<Value, SerializeError> {
        let mut nested = SerializeContext {
            world: &mut *self.world,
            session: &mut *self.session,
            fields: Vec::new(),
            depth: self.depth + 1,
        };
        f(&mut nested)?;
        Ok(nested.finish())
    }

    /// Registers `entity` in the session reference table under its runtime
    /// reference, generating one if needed.
    pub fn register_object(&mut self, entity: Entity) -> Option<String> {
        let runtime_ref = self.world.runtime_ref(entity)?;
        self.session.register(&runtime_ref, entity);
        Some(runtime_ref)
    }

    /// Composite id text for a reference to `entity`.
    ///
    /// Despawned entities yield `None` so the reference is simply omitted.
    pub fn entity_id(&mut self, entity: Entity) -> Result<Option<String>, SerializeError> {
        if !self.world.is_alive(entity) {
            log::debug!("Skipping reference to despawned {entity}");
            return Ok(None);
        }
        let id = self
            .world
            .composite_id(entity)
            .ok_or(SerializeError::Unidentified { entity })?;
        self.session.register(&id.entity_ref, entity);
        Ok(Some(id.to_string()))
    }

    pub(crate) fn owned_value(&mut self, entity: Entity) -> Result<Option<Value>, SerializeError> {
        let Some(id) = self.entity_id(entity)? else {
            return Ok(None);
        };
        let state = self.world.take_state(entity);
        let result = self.nested_value(|ctx| {
            ctx.write_value(OWNED_ID_KEY, Value::String(id));
            match &state {
                Some(state) => state.serialize_fields(ctx),
                None => Ok(()),
            }
        });
        if let Some(state) = state {
            self.world.restore_state(entity, state);
        }
        result.map(Some)
    }

    pub(crate) fn finish(self) -> Value {
        Value::Map(self.fields)
    }
}

// ---------------------------------------------------------------------------
// DeserializeContext
// ---------------------------------------------------------------------------

/// Context for reading one document scope during one phase.
pub struct DeserializeContext<'a> {
    world: &'a mut World,
    registry: &'a TemplateRegistry,
    session: &'a mut Session,
    config: &'a PersistConfig,
    scope: &'a Value,
    key: String,
    depth: usize,
}

impl<'a> DeserializeContext<'a> {
    pub(crate) fn new(
        world: &'a mut World,
        registry: &'a TemplateRegistry,
        session: &'a mut Session,
        config: &'a PersistConfig,
        scope: &'a Value,
    ) -> Self {
        Self {
            world,
            registry,
            session,
            config,
            scope,
            key: String::new(),
            depth: 0,
        }
    }

    fn nested<'s>(&'s mut self, scope: &'s Value) -> DeserializeContext<'s> {
        DeserializeContext {
            world: &mut *self.world,
            registry: self.registry,
            session: &mut *self.session,
            config: self.config,
            scope,
            key: self.key.clone(),
            depth: self.depth + 1,
        }
    }

    pub fn world(&self) -> &World {
        self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.world
    }

    pub fn registry(&self) -> &TemplateRegistry {
        self.registry
    }

    /// Current read phase. Phase 0 resolves identities, later phases
    /// hydrate data.
    pub fn phase(&self) -> u32 {
        self.session.phase()
    }

    /// Version of the document being read.
    pub fn version(&self) -> u32 {
        self.session.version()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The scope this context reads from.
    pub fn scope(&self) -> &Value {
        self.scope
    }

    pub fn contains(&self, key: &str) -> bool {
        self.scope.get(key).is_some()
    }

    /// Reads `key` into `value`.
    ///
    /// Returns `Ok(false)` if the key is absent, leaving `value` untouched.
    /// A value of the wrong shape is logged, recorded in the load report and
    /// also yields `Ok(false)` unless strict typing is configured.
    pub fn read<T: Field>(&mut self, key: &str, value: &mut T) -> Result<bool, DeserializeError> {
        let scope = self.scope;
        let Some(node) = scope.get(key) else {
            return Ok(false);
        };
        key.clone_into(&mut self.key);
        match value.read_value(node, self) {
            Ok(()) => Ok(true),
            Err(e) => self.recover(key, e),
        }
    }

    /// Like [`read`](Self::read), falling back to earlier names of the field
    /// when `key` is absent.
    pub fn read_renamed<T: Field>(
        &mut self,
        key: &str,
        old_keys: &[&str],
        value: &mut T,
    ) -> Result<bool, DeserializeError> {
        if self.contains(key) {
            return self.read(key, value);
        }
        for old in old_keys {
            if self.contains(old) {
                log::debug!("Reading '{key}' from renamed key '{old}'");
                return self.read(old, value);
            }
        }
        Ok(false)
    }

    /// Reads an owning entity field written by
    /// [`SerializeContext::write_owned`].
    pub fn read_owned<T: OwnedField + ?Sized>(
        &mut self,
        key: &str,
        value: &mut T,
    ) -> Result<bool, DeserializeError> {
        let scope = self.scope;
        let Some(node) = scope.get(key) else {
            return Ok(false);
        };
        key.clone_into(&mut self.key);
        match value.read_owned(node, self) {
            Ok(()) => Ok(true),
            Err(e) => self.recover(key, e),
        }
    }

    /// Runs `f` against `node` as a nested scope.
    ///
    /// This is the subtree boundary: a registry failure inside the nested
    /// scope is logged and recorded, and the rest of the document continues.
    pub fn read_nested_node(
        &mut self,
        node: &Value,
        f: impl FnOnce(&mut DeserializeContext<'_>) -> Result<(), DeserializeError>,
    ) -> Result<(), DeserializeError> {
        if !matches!(node, Value::Map(_)) {
            return Err(DeserializeError::TypeMismatch {
                expected: "map",
                found: node.kind(),
            });
        }
        let result = f(&mut self.nested(node));
        match result {
            Err(e) if e.is_registry() => {
                self.abort_subtree(&e);
                Ok(())
            }
            other => other,
        }
    }

    fn recover(&mut self, key: &str, error: DeserializeError) -> Result<bool, DeserializeError> {
        if self.config.strict_types {
            return Err(error);
        }
        let (expected, found) = match &error {
            DeserializeError::TypeMismatch { expected, found } => (*expected, *found),
            DeserializeError::MalformedReference(_) => ("composite id", "string"),
            _ => return Err(error),
        };
        // Every phase reads the same node, so the mismatch is reported once.
        if self.phase() == 0 {
            log::warn!("Field '{key}': {error}; keeping previous value");
            self.session.report.diagnostics.push(Diagnostic::TypeMismatch {
                key: key.to_owned(),
                expected,
                found,
            });
        }
        Ok(false)
    }

    fn abort_subtree(&mut self, error: &DeserializeError) {
        log::error!("Aborted reading '{}': {error}", self.key);
        self.session.report.diagnostics.push(Diagnostic::SubtreeAborted {
            key: self.key.clone(),
            error: error.to_string(),
        });
    }

    // -- References --

    pub(crate) fn parse_id(text: &str) -> Result<CompositeId, DeserializeError> {
        CompositeId::from_str(text).map_err(|_| DeserializeError::MalformedReference(text.to_owned()))
    }

    /// Looks up a live entity registered under `runtime_ref` this session.
    pub fn find_reference(&self, runtime_ref: &str) -> Option<Entity> {
        self.session
            .lookup(runtime_ref)
            .filter(|&e| self.world.is_alive(e))
    }

    /// Registers `entity` under `runtime_ref`. The first live registration
    /// wins; the returned entity is the one kept.
    pub fn register_object(&mut self, runtime_ref: &str, entity: Entity) -> Entity {
        if let Some(existing) = self.session.lookup(runtime_ref) {
            if !self.world.is_alive(existing) {
                self.session.forget(runtime_ref);
            }
        }
        self.session.register(runtime_ref, entity)
    }

    /// Phase-aware reference resolution.
    ///
    /// In phase 0 the id is reconciled and `None` is returned, so the field
    /// is left untouched. Later phases only look the entity up.
    pub fn resolve(&mut self, id: &CompositeId) -> Result<Option<Entity>, DeserializeError> {
        if self.phase() == 0 {
            self.reconcile(id)?;
            return Ok(None);
        }
        let found = self.find_reference(&id.entity_ref);
        if found.is_none() {
            self.unresolved(id);
        }
        Ok(found)
    }

    /// Matches `id` to a live entity, spawning its template instance if no
    /// entity of that instance exists yet.
    ///
    /// 1. An entity already registered under the entity reference is reused.
    /// 2. Otherwise, if the instance root is registered, its child with the
    ///    id's LocalId is located and tagged. A nested path is followed
    ///    through the nested template roots of that instance.
    /// 3. Otherwise the whole template is instantiated once, its root is
    ///    tagged with the instance reference and the child is located.
    pub fn reconcile(&mut self, id: &CompositeId) -> Result<Entity, DeserializeError> {
        if let Some(entity) = self.find_reference(&id.entity_ref) {
            self.tag(entity, &id.entity_ref);
            return Ok(entity);
        }

        let root = match self.find_reference(&id.instance_ref) {
            Some(root) => root,
            None => self.spawn_instance(id)?,
        };
        if id.is_root() {
            self.tag(root, &id.entity_ref);
            return Ok(root);
        }

        let unknown = |local_id| DeserializeError::UnknownLocalId {
            template: id.template_id,
            local_id,
        };
        let mut owner = root;
        for &local_id in &id.nested_path {
            owner = self
                .world
                .resolve_local(owner, local_id)
                .filter(|&e| self.world.identity(e).is_some_and(|i| i.is_template_root()))
                .ok_or_else(|| unknown(local_id))?;
        }
        let child = self
            .world
            .resolve_local(owner, id.local_id)
            .ok_or_else(|| unknown(id.local_id))?;
        self.tag(child, &id.entity_ref);
        Ok(child)
    }

    fn spawn_instance(&mut self, id: &CompositeId) -> Result<Entity, DeserializeError> {
        let root = self
            .world
            .instantiate(self.registry, id.template_id)
            .ok_or(DeserializeError::UnknownTemplate { id: id.template_id })?;
        self.session.report.templates_spawned += 1;
        log::debug!(
            "Spawned template {} as {root} for reference {id}",
            id.template_id
        );
        self.tag(root, &id.instance_ref);
        Ok(root)
    }

    fn tag(&mut self, entity: Entity, runtime_ref: &str) {
        if self.register_object(runtime_ref, entity) != entity {
            return;
        }
        if let Some(identity) = self.world.identity_mut(entity) {
            if identity.runtime_ref.as_deref() != Some(runtime_ref) {
                identity.runtime_ref = Some(runtime_ref.to_owned());
            }
        }
    }

    /// Lookups happen in every phase after the first; only phase 1 reports.
    fn unresolved(&mut self, id: &CompositeId) {
        if self.phase() != 1 {
            return;
        }
        log::warn!("Reference {id} was not resolved during identity resolution");
        self.session
            .report
            .diagnostics
            .push(Diagnostic::UnresolvedReference { id: id.to_string() });
    }

    pub(crate) fn read_owned_entity(
        &mut self,
        node: &Value,
    ) -> Result<Option<Entity>, DeserializeError> {
        let Some(text) = node.get(OWNED_ID_KEY).and_then(Value::as_str) else {
            return Err(match node {
                Value::Map(_) => DeserializeError::MalformedReference(format!(
                    "owned entity without '{OWNED_ID_KEY}'"
                )),
                _ => DeserializeError::TypeMismatch {
                    expected: "map",
                    found: node.kind(),
                },
            });
        };
        let id = Self::parse_id(text)?;

        let entity = if self.phase() == 0 {
            match self.reconcile(&id) {
                Ok(entity) => entity,
                Err(e) if e.is_registry() => {
                    self.abort_subtree(&e);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        } else {
            match self.find_reference(&id.entity_ref) {
                Some(entity) => entity,
                None => {
                    self.unresolved(&id);
                    return Ok(None);
                }
            }
        };

        if let Some(mut state) = self.world.take_state(entity) {
            let result = self.read_nested_node(node, |ctx| state.deserialize_fields(ctx));
            self.world.restore_state(entity, state);
            result?;
        }
        Ok((self.phase() > 0).then_some(entity))
    }
}
