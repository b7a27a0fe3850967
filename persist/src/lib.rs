//! # RedLilium Persist
//!
//! Object-graph persistence with stable entity identity and template
//! reconciliation.
//!
//! ## Identity
//!
//! - [`Template`] / [`TemplateRegistry`]: authored blueprints under stable,
//!   append-only [`TemplateId`]s
//! - [`StableIdentity`]: per-entity LocalId and runtime reference
//! - [`CompositeId`]: `templateId.instanceRef.localId.entityRef`, the
//!   persisted form of an entity reference
//! - [`assign_ids`]: authoring-time LocalId assignment
//!
//! ## Host
//!
//! - [`Entity`] / [`World`]: entity handles, hierarchy, per-entity state,
//!   instantiate-from-template and despawn
//!
//! ## Saving and loading
//!
//! - [`Serializer`]: `save` / `load` against a [`Sink`], version gating and
//!   multi-phase reference resolution
//! - [`Persist`] (trait and derive), [`Field`], [`OwnedField`]: per-type
//!   field description
//! - [`PersistConfig`]: serializer settings, loadable from TOML
//!
//! ```ignore
//! #[derive(Persist, Default)]
//! struct SaveGame {
//!     #[persist(owned)]
//!     player: Option<Entity>,
//!     target: Option<Entity>,
//!     score: u32,
//! }
//!
//! impl Schema for SaveGame {
//!     const VERSIONS: &'static [u32] = &[1];
//! }
//!
//! let sink = FileSink::new("saves");
//! let mut serializer = Serializer::new(&mut world, &registry);
//! serializer.save(&game, &sink, "slot0.ron")?;
//! ```

extern crate self as redlilium_persist;

mod config;
mod entity;
mod identity;
pub mod serialize;
mod sink;
mod template;
mod world;

pub use config::PersistConfig;
pub use entity::Entity;
pub use identity::{
    assign_ids, AssignSummary, CompositeId, ConflictReason, IdConflict, IdentityError,
    RandomRefGenerator, RuntimeRefGenerator, SequentialRefGenerator, StableIdentity,
    UNASSIGNED_LOCAL_ID,
};
pub use persist_macro::Persist;
pub use serialize::{
    DeserializeContext, DeserializeError, Diagnostic, Field, LoadReport, Mode, OwnedField,
    Persist, PersistError, Schema, SerializeContext, SerializeError, Serializer, Value,
};
pub use sink::{FileSink, MemorySink, Sink, SinkError};
pub use template::{Template, TemplateId, TemplateRegistry};
pub use world::{EntityState, World};
