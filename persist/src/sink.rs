//! Text storage backends for saved documents.
//!
//! A [`Sink`] reads and writes UTF-8 text at slash-separated relative
//! paths. Write support is optional; read-only sinks return
//! [`SinkError::ReadOnly`].
//!
//! - [`MemorySink`]: in-memory storage for tests and tools
//! - [`FileSink`]: files under a root directory

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

/// Errors from a [`Sink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),
    /// Empty, absolute, or containing `..` segments.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("sink is read-only")]
    ReadOnly,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            SinkError::NotFound(err.to_string())
        } else {
            SinkError::Io(err)
        }
    }
}

/// Storage for document text.
pub trait Sink: Send + Sync {
    fn read_text(&self, path: &str) -> Result<String, SinkError>;

    fn write_text(&self, path: &str, text: &str) -> Result<(), SinkError> {
        let _ = (path, text);
        Err(SinkError::ReadOnly)
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Validates a sink path and normalizes `\` separators to `/`.
fn normalize(path: &str) -> Result<String, SinkError> {
    let normalized = path.replace('\\', "/");
    let invalid = normalized.is_empty()
        || normalized.starts_with('/')
        || normalized
            .split('/')
            .any(|segment| segment.is_empty() || segment == "..");
    if invalid {
        return Err(SinkError::InvalidPath(path.to_owned()));
    }
    Ok(normalized)
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// In-memory sink. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemorySink {
    files: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a document.
    pub fn insert(&self, path: impl Into<String>, text: impl Into<String>) {
        self.files.write().insert(path.into(), text.into());
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files.read().get(path).cloned()
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        self.files.write().remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl Sink for MemorySink {
    fn read_text(&self, path: &str) -> Result<String, SinkError> {
        let path = normalize(path)?;
        self.files
            .read()
            .get(&path)
            .cloned()
            .ok_or(SinkError::NotFound(path))
    }

    fn write_text(&self, path: &str, text: &str) -> Result<(), SinkError> {
        let path = normalize(path)?;
        self.files.write().insert(path, text.to_owned());
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// FileSink
// ---------------------------------------------------------------------------

/// Sink storing each document as a file under a root directory.
///
/// Writes go to a temporary sibling file that is then renamed over the
/// target, so an interrupted save never leaves a truncated document.
pub struct FileSink {
    root: PathBuf,
    read_only: bool,
}

impl FileSink {
    /// Creates a read-write sink. The directory does not need to exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_only: false,
        }
    }

    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_only: true,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SinkError> {
        Ok(self.root.join(normalize(path)?))
    }
}

impl Sink for FileSink {
    fn read_text(&self, path: &str) -> Result<String, SinkError> {
        Ok(std::fs::read_to_string(self.resolve(path)?)?)
    }

    fn write_text(&self, path: &str, text: &str) -> Result<(), SinkError> {
        if self.read_only {
            return Err(SinkError::ReadOnly);
        }
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = full_path.clone().into_os_string();
        tmp.push(".tmp");
        let written = std::fs::write(&tmp, text).and_then(|()| std::fs::rename(&tmp, &full_path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
