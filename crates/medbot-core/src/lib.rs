//! Retrieval-augmented chat pipeline, per-session state, configuration loading and the
//! chat loop shared by every surface.

pub mod bootstrap;
pub mod channel;
pub mod chat;
pub mod config;
pub mod error;
pub mod rag;
pub mod session;
pub mod vault;

pub use channel::{Channel, ChannelError, ChannelMessage};
pub use chat::ChatLoop;
pub use config::Config;
pub use error::{ConfigError, RetrievalError, StartupError, TurnError};
pub use rag::RagPipeline;
pub use session::{Answer, ChatBackend, Session, SessionManager, SessionSnapshot};
