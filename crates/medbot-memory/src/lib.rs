//! Conversation memory, the read-only vector index and the offline index builder.

pub mod conversation;
pub mod document;
pub mod error;
pub mod index;
pub mod session;

pub use conversation::{ConversationMemory, Turn, TurnRole};
pub use error::{IndexError, MemoryError};
pub use index::{ChunkId, DocumentChunk, ScoredChunk, VectorIndex};
pub use session::SessionId;
