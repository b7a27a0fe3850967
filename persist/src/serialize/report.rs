//! Non-fatal findings collected while loading a document.

/// A recoverable problem encountered during a load.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Two different entities claimed the same runtime reference. The first
    /// registration was kept.
    DuplicateReference { runtime_ref: String },
    /// A stored value had the wrong type; the field kept its default.
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    /// A nested object failed to load; the rest of the document was applied.
    SubtreeAborted { key: String, error: String },
    /// A reference could not be resolved in a later phase.
    UnresolvedReference { id: String },
}

/// Outcome of a successful [`deserialise`](crate::Serializer::deserialise).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Template instances spawned to satisfy references.
    pub templates_spawned: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadReport {
    /// Whether the document was applied without any diagnostic.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}
