//! Error types for saving and loading documents.

use crate::entity::Entity;
use crate::sink::SinkError;
use crate::template::TemplateId;

/// Errors that can occur while building a document.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    /// An entity outside any template instance was written as a reference.
    #[error("{entity} has no stable identity and cannot be referenced")]
    Unidentified { entity: Entity },
    /// Encoding the document to text failed.
    #[error("format error: {0}")]
    Format(String),
}

/// Errors that can occur while applying a document.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("unsupported document version {found} (supported: {supported:?})")]
    UnsupportedVersion { found: u32, supported: Vec<u32> },
    #[error("document has no version")]
    MissingVersion,
    #[error("template {id} is not registered")]
    UnknownTemplate { id: TemplateId },
    #[error("template {template} has no entity with LocalId {local_id}")]
    UnknownLocalId { template: TemplateId, local_id: i32 },
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("malformed reference: {0}")]
    MalformedReference(String),
    /// Decoding the document text failed.
    #[error("format error: {0}")]
    Format(String),
}

impl DeserializeError {
    /// Schema errors reject the whole document before anything is applied.
    pub fn is_schema(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVersion { .. } | Self::MissingVersion
        )
    }

    /// Registry errors abort the enclosing subtree but not the load.
    pub fn is_registry(&self) -> bool {
        matches!(
            self,
            Self::UnknownTemplate { .. } | Self::UnknownLocalId { .. }
        )
    }
}

/// Errors from the storage-level [`save`](crate::Serializer::save) and
/// [`load`](crate::Serializer::load) entry points.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error(transparent)]
    Deserialize(#[from] DeserializeError),
    #[error("storage error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: SinkError,
    },
}
