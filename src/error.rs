use thiserror::Error;

/// Error types for the place repository
#[derive(Error, Debug)]
pub enum PlaceError {
    /// Malformed caller input: missing geometry or name, degenerate bounding box
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store rejected a transaction. `committed` counts the units (places, or keys for
    /// bulk erase) that were durably written by earlier transactions of the same call.
    #[error("Write rejected after {committed} committed: {reason}")]
    Write { committed: usize, reason: String },

    /// A cancellation token or deadline tripped between two commits
    #[error("Operation cancelled after {committed} committed")]
    Cancelled { committed: usize },

    /// Invalid geohash input or output
    #[error("Invalid geohash: {0}")]
    InvalidGeohash(String),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Lock acquisition failed
    #[error("Failed to acquire lock")]
    Lock,

    /// Store has been closed
    #[error("Database is closed")]
    DatabaseClosed,

    /// Unexpected end of file while replaying the append-only log
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// Invalid data format in the append-only log
    #[error("Invalid data format")]
    InvalidFormat,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error from the persistence layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlaceError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        PlaceError::Validation(msg.into())
    }

    pub(crate) fn write(committed: usize, reason: impl Into<String>) -> Self {
        PlaceError::Write {
            committed,
            reason: reason.into(),
        }
    }

    /// Whether retrying the whole operation may succeed.
    ///
    /// Only store rejections qualify; saves are id-preserving upserts, so replaying
    /// already-committed batches is harmless.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlaceError::Write { .. })
    }

    /// Number of units durably committed before a bulk operation stopped, if known.
    pub fn committed(&self) -> Option<usize> {
        match self {
            PlaceError::Write { committed, .. } | PlaceError::Cancelled { committed } => {
                Some(*committed)
            }
            _ => None,
        }
    }
}

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, PlaceError>;
