//! HTTP JSON surface over [`medbot_core::ChatBackend`] with bearer auth, per-IP rate
//! limiting and a health endpoint.

mod error;
mod handlers;
mod router;
mod server;

pub use error::GatewayError;
pub use server::GatewayServer;
