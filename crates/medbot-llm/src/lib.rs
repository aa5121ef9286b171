//! Chat and embedding provider abstraction and backend implementations.

pub mod any;
#[cfg(feature = "candle")]
pub mod candle_embed;
pub mod compatible;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;
pub(crate) mod retry;

pub use any::{AnyEmbedder, AnyProvider};
pub use error::LlmError;
pub use provider::{Embedder, LlmProvider, Message, Role, StatusTx};
