// Error types for project storage

use std::path::PathBuf;

/// Errors raised by the blob store and the document parser.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown artifact: '{0}'")]
    UnknownArtifact(String),

    #[error("Invalid history delta {0} (expected 0, -1 or -2)")]
    InvalidDelta(i32),

    #[error("Malformed project document: {0}")]
    MalformedDocument(String),

    #[error("Corrupt history record for project {project_id}: {message}")]
    CorruptHistory { project_id: i64, message: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
