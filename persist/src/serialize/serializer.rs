//! The mode-aware entry point for saving and loading object graphs.

use std::collections::HashMap;

use super::context::{DeserializeContext, SerializeContext};
use super::error::{DeserializeError, PersistError, SerializeError};
use super::field::Persist;
use super::format;
use super::report::{Diagnostic, LoadReport};
use super::value::Value;
use crate::config::PersistConfig;
use crate::entity::Entity;
use crate::sink::Sink;
use crate::template::TemplateRegistry;
use crate::world::World;

/// Top-level key holding the document's schema version.
pub const VERSION_KEY: &str = "version";

/// A document root with a declared set of schema versions.
///
/// ```ignore
/// impl Schema for SaveGame {
///     const VERSIONS: &'static [u32] = &[1, 2];
/// }
/// ```
pub trait Schema: Persist {
    /// Every version this type can read, oldest first. The last entry is the
    /// version written.
    const VERSIONS: &'static [u32];

    /// Number of full passes a load makes over the document.
    const PHASES: u32 = 2;

    fn current_version() -> u32 {
        Self::VERSIONS.last().copied().unwrap_or(0)
    }
}

/// Direction of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Write,
    Read,
}

/// State of one save or load call.
///
/// The reference table maps runtime references to live entities. It is
/// cleared whenever a new session begins.
#[derive(Debug, Default)]
pub struct Session {
    pub(crate) mode: Mode,
    pub(crate) version: u32,
    pub(crate) phase: u32,
    references: HashMap<String, Entity>,
    pub(crate) report: LoadReport,
}

impl Session {
    pub(crate) fn begin(&mut self, mode: Mode, version: u32) {
        self.mode = mode;
        self.version = version;
        self.phase = 0;
        self.references.clear();
        self.report = LoadReport::default();
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub(crate) fn lookup(&self, runtime_ref: &str) -> Option<Entity> {
        self.references.get(runtime_ref).copied()
    }

    pub(crate) fn forget(&mut self, runtime_ref: &str) {
        self.references.remove(runtime_ref);
    }

    /// Registers `entity` under `runtime_ref` and returns the entity kept.
    /// A different entity claiming a taken reference is rejected.
    pub(crate) fn register(&mut self, runtime_ref: &str, entity: Entity) -> Entity {
        match self.references.get(runtime_ref) {
            Some(&existing) if existing != entity => {
                log::warn!(
                    "Runtime reference '{runtime_ref}' already belongs to {existing}; ignoring {entity}"
                );
                self.report.diagnostics.push(Diagnostic::DuplicateReference {
                    runtime_ref: runtime_ref.to_owned(),
                });
                existing
            }
            Some(&existing) => existing,
            None => {
                self.references.insert(runtime_ref.to_owned(), entity);
                entity
            }
        }
    }
}

/// Saves and loads object graphs against a [`World`].
///
/// One serializer drives one session at a time; it is not reentrant.
///
/// ```ignore
/// let mut serializer = Serializer::new(&mut world, &registry);
/// serializer.save(&game, &sink, "slot0.ron")?;
/// let report = serializer.load(&mut game, &sink, "slot0.ron")?;
/// ```
pub struct Serializer<'w> {
    world: &'w mut World,
    registry: &'w TemplateRegistry,
    config: PersistConfig,
    session: Session,
}

impl<'w> Serializer<'w> {
    pub fn new(world: &'w mut World, registry: &'w TemplateRegistry) -> Self {
        Self::with_config(world, registry, PersistConfig::default())
    }

    pub fn with_config(
        world: &'w mut World,
        registry: &'w TemplateRegistry,
        config: PersistConfig,
    ) -> Self {
        Self {
            world,
            registry,
            config,
            session: Session::default(),
        }
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        self.world
    }

    pub fn mode(&self) -> Mode {
        self.session.mode
    }

    /// The active schema version. Outside a call this is the version of
    /// the last save, or whatever preceded the last load.
    pub fn version(&self) -> u32 {
        self.session.version
    }

    pub fn phase(&self) -> u32 {
        self.session.phase
    }

    // -- Document level --

    /// Builds the document for `root`, starting with its schema version.
    pub fn serialise<T: Schema + ?Sized>(&mut self, root: &T) -> Result<Value, SerializeError> {
        let version = T::current_version();
        self.session.begin(Mode::Write, version);

        let mut ctx = SerializeContext::new(self.world, &mut self.session);
        ctx.write_value(VERSION_KEY, Value::I64(i64::from(version)));
        root.serialize_fields(&mut ctx)?;
        Ok(ctx.finish())
    }

    /// Applies `doc` to `root` in [`Schema::PHASES`] passes.
    ///
    /// A missing or undeclared version fails before anything is touched.
    /// Other failures may leave `root` and the world partially updated.
    pub fn deserialise<T: Schema + ?Sized>(
        &mut self,
        root: &mut T,
        doc: &Value,
    ) -> Result<LoadReport, DeserializeError> {
        let version = read_version(doc)?;
        if !T::VERSIONS.contains(&version) {
            log::error!(
                "Rejecting document version {version}, supported: {:?}",
                T::VERSIONS
            );
            return Err(DeserializeError::UnsupportedVersion {
                found: version,
                supported: T::VERSIONS.to_vec(),
            });
        }

        let previous = self.session.version;
        self.session.begin(Mode::Read, version);
        if self.config.reconnect_live_entities {
            self.seed_live_references();
        }

        let result = self.run_phases(root, doc, T::PHASES);
        self.session.version = previous;
        result?;

        let report = std::mem::take(&mut self.session.report);
        log::debug!(
            "Loaded version {version} document: {} templates spawned, {} diagnostics",
            report.templates_spawned,
            report.diagnostics.len()
        );
        Ok(report)
    }

    fn run_phases<T: Persist + ?Sized>(
        &mut self,
        root: &mut T,
        doc: &Value,
        phases: u32,
    ) -> Result<(), DeserializeError> {
        for phase in 0..phases {
            self.session.phase = phase;
            let mut ctx = DeserializeContext::new(
                self.world,
                self.registry,
                &mut self.session,
                &self.config,
                doc,
            );
            root.deserialize_fields(&mut ctx)?;
        }
        Ok(())
    }

    fn seed_live_references(&mut self) {
        let live: Vec<(String, Entity)> = self
            .world
            .iter()
            .filter_map(|e| {
                let runtime_ref = self.world.identity(e)?.runtime_ref()?;
                Some((runtime_ref.to_owned(), e))
            })
            .collect();
        for (runtime_ref, entity) in live {
            self.session.register(&runtime_ref, entity);
        }
    }

    // -- Text --

    pub fn to_text(&self, doc: &Value) -> Result<String, SerializeError> {
        format::encode(doc, self.config.pretty)
    }

    pub fn from_text(&self, text: &str) -> Result<Value, DeserializeError> {
        format::decode(text)
    }

    // -- Storage --

    /// Serialises `root` and writes it to `path` in `sink`.
    pub fn save<T: Schema + ?Sized>(
        &mut self,
        root: &T,
        sink: &dyn Sink,
        path: &str,
    ) -> Result<(), PersistError> {
        let doc = self.serialise(root)?;
        let text = self.to_text(&doc)?;
        sink.write_text(path, &text).map_err(|source| PersistError::Io {
            path: path.to_owned(),
            source,
        })?;
        log::debug!("Saved '{path}' ({} bytes)", text.len());
        Ok(())
    }

    /// Reads `path` from `sink` and applies it to `root`.
    pub fn load<T: Schema + ?Sized>(
        &mut self,
        root: &mut T,
        sink: &dyn Sink,
        path: &str,
    ) -> Result<LoadReport, PersistError> {
        let text = sink.read_text(path).map_err(|source| PersistError::Io {
            path: path.to_owned(),
            source,
        })?;
        let doc = self.from_text(&text)?;
        Ok(self.deserialise(root, &doc)?)
    }

    // -- Reference table --

    /// Registers `entity` under its runtime reference in the current session.
    /// Returns the reference, or `None` if the entity is dead.
    pub fn register_object(&mut self, entity: Entity) -> Option<String> {
        let runtime_ref = self.world.runtime_ref(entity)?;
        self.session.register(&runtime_ref, entity);
        Some(runtime_ref)
    }

    /// Looks up a live entity registered under `runtime_ref`.
    pub fn find_reference(&self, runtime_ref: &str) -> Option<Entity> {
        self.session
            .lookup(runtime_ref)
            .filter(|&e| self.world.is_alive(e))
    }

    /// Diagnostics recorded by the last save. A load hands its diagnostics
    /// over in the returned [`LoadReport`].
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.session.report.diagnostics
    }
}

fn read_version(doc: &Value) -> Result<u32, DeserializeError> {
    let version = match doc.get(VERSION_KEY) {
        Some(Value::I64(n)) => u32::try_from(*n).ok(),
        Some(Value::U64(n)) => u32::try_from(*n).ok(),
        _ => None,
    };
    version.ok_or_else(|| {
        log::error!("Rejecting document without a usable '{VERSION_KEY}' entry");
        DeserializeError::MissingVersion
    })
}
