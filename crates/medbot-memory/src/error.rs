use std::path::PathBuf;

use crate::conversation::TurnRole;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("{role} turn content must not be empty")]
    EmptyContent { role: TurnRole },
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index not found at {0}")]
    NotFound(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed index data at {path} line {line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed index manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),

    #[error("index checksum mismatch: manifest {expected}, data {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("index manifest lists {expected} chunks, data has {actual}")]
    ChunkCountMismatch { expected: usize, actual: usize },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index built with embedding model '{index}', configured model is '{configured}'")]
    ModelMismatch { index: String, configured: String },

    #[error("index contains no chunks")]
    Empty,
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.into())
        } else {
            Self::Io {
                path: path.into(),
                source,
            }
        }
    }
}
