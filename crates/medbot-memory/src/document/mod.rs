//! Offline index construction: load text documents, split them into chunks, embed each
//! chunk and persist the result as a [`crate::VectorIndex`].

pub mod builder;
pub mod error;
pub mod loader;
pub mod splitter;
pub mod types;

pub use builder::IndexBuilder;
pub use error::DocumentError;
pub use loader::TextLoader;
pub use splitter::{SplitterConfig, TextSplitter};
pub use types::{Document, TextChunk};

/// Default maximum file size: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
