/*!
Error types for the checkpoint engine.
*/

use thiserror::Error;

/// Result type used throughout the checkpoint core.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while capturing, storing or restoring a checkpoint.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// A registered value has no adapter in the adapter set
    #[error("Unsupported type '{type_name}' for registered entry '{entry}'")]
    UnsupportedType { type_name: String, entry: String },

    /// A name (registry entry or adapter tag) is already taken
    #[error("Duplicate name: '{0}' is already registered")]
    DuplicateName(String),

    /// A registry entry or checkpoint does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A registry entry exists but holds another type
    #[error("Type mismatch for '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Stored bytes could not be turned back into a snapshot
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Restoration order is impossible
    #[error("Cyclic dependency between entries: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// Underlying storage read or write failed
    #[error("Storage I/O failure: {0}")]
    StorageIo(#[from] std::io::Error),

    /// JSON serialization/deserialization errors while producing a representation
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid identifiers, configuration or arguments
    #[error("Validation error: {0}")]
    Validation(String),
}

impl CheckpointError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new corrupt snapshot error
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::CorruptSnapshot(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unsupported<S1, S2>(type_name: S1, entry: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::UnsupportedType {
            type_name: type_name.into(),
            entry: entry.into(),
        }
    }

    /// Short stable label for the error kind, used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::DuplicateName(_) => "duplicate_name",
            Self::NotFound(_) => "not_found",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::CorruptSnapshot(_) => "corrupt_snapshot",
            Self::CyclicDependency(_) => "cyclic_dependency",
            Self::StorageIo(_) => "storage_io",
            Self::Json(_) => "json",
            Self::Compression(_) => "compression",
            Self::Validation(_) => "validation",
        }
    }
}
