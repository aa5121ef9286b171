use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file too large: {path} ({size} bytes)")]
    FileTooLarge { path: PathBuf, size: u64 },

    #[error("no documents found under {0}")]
    NoDocuments(PathBuf),

    #[error("invalid document pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to read directory entry: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("embedding failed for {source_name} chunk {chunk_index}: {error}")]
    Embedding {
        source_name: String,
        chunk_index: usize,
        #[source]
        error: medbot_llm::LlmError,
    },

    #[error("index error: {0}")]
    Index(#[from] crate::error::IndexError),
}
