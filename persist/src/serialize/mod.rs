//! Saving and loading object graphs as versioned documents.
//!
//! This module provides:
//!
//! - [`Serializer`]: save/load entry points, schema version gating and the
//!   phase loop
//! - [`SerializeContext`] / [`DeserializeContext`]: per-scope field access
//!   and reference reconciliation
//! - [`Persist`] / [`Field`] / [`OwnedField`]: per-type field description
//! - [`Value`]: the document tree, encoded as RON text
//!
//! # Loading in phases
//!
//! A load runs [`Schema::PHASES`] full passes over the same document. Phase 0
//! only establishes which entities exist: every composite id is reconciled
//! against the session's reference table, spawning template instances as
//! needed, and reference fields are left untouched. Later phases hydrate
//! data and assign references by plain table lookup, so forward and cyclic
//! references resolve regardless of document order.
//!
//! # Owning vs referencing
//!
//! An `Entity` field is a reference and is written as its composite id
//! string. A field marked `#[persist(owned)]` is the entity's owner and is
//! written as `{"@id": <composite id>, ..entity state}`.

mod context;
mod error;
pub mod field;
mod format;
mod report;
mod serializer;
pub mod value;

pub use context::{DeserializeContext, SerializeContext, OWNED_ID_KEY};
pub use error::{DeserializeError, PersistError, SerializeError};
pub use field::{Field, OwnedField, Persist};
pub use format::{decode, encode};
pub use report::{Diagnostic, LoadReport};
pub use serializer::{Mode, Schema, Serializer, Session, VERSION_KEY};
pub use value::Value;
