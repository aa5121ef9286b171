use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use medbot_core::ChatBackend;
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::router::{RouterLimits, build_router};

#[derive(Clone)]
pub(crate) struct AppState {
    pub backend: Arc<dyn ChatBackend>,
    pub started_at: Instant,
}

pub struct GatewayServer {
    addr: SocketAddr,
    auth_token: Option<String>,
    rate_limit: u32,
    max_body_size: usize,
    backend: Arc<dyn ChatBackend>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    #[must_use]
    pub fn new(
        bind: &str,
        port: u16,
        backend: Arc<dyn ChatBackend>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let addr: SocketAddr = format!("{bind}:{port}").parse().unwrap_or_else(|e| {
            tracing::warn!("invalid bind '{bind}': {e}, falling back to 127.0.0.1:{port}");
            SocketAddr::from(([127, 0, 0, 1], port))
        });

        if addr.ip().is_unspecified() {
            tracing::warn!("gateway binding to {addr}, reachable from other hosts");
        }

        Self {
            addr,
            auth_token: None,
            rate_limit: 120,
            max_body_size: 1_048_576,
            backend,
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_auth(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = limit;
        self
    }

    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until the shutdown channel flips to `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or encounters a fatal I/O error.
    pub async fn serve(self) -> Result<(), GatewayError> {
        if self.auth_token.is_none() {
            tracing::warn!("gateway auth token not set, session endpoints are open");
        }
        let state = AppState {
            backend: self.backend,
            started_at: Instant::now(),
        };
        let router = build_router(
            state,
            RouterLimits {
                auth_token: self.auth_token,
                rate_limit: self.rate_limit,
                max_body_size: self.max_body_size,
            },
        );

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: self.addr.to_string(),
                source,
            })?;
        tracing::info!("gateway listening on {}", self.addr);

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            tracing::info!("gateway shutting down");
        })
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use medbot_core::TurnError;
    use medbot_core::session::{Answer, SessionSnapshot};
    use medbot_memory::SessionId;

    use super::*;

    struct NoopBackend;

    impl ChatBackend for NoopBackend {
        fn submit<'a>(
            &'a self,
            _session: &'a SessionId,
            _text: &'a str,
        ) -> BoxFuture<'a, Result<Answer, TurnError>> {
            Box::pin(async { Err(TurnError::Cancelled) })
        }

        fn snapshot<'a>(
            &'a self,
            _session: &'a SessionId,
        ) -> BoxFuture<'a, Result<Option<SessionSnapshot>, TurnError>> {
            Box::pin(async { Ok(None) })
        }

        fn remove<'a>(&'a self, _session: &'a SessionId) -> BoxFuture<'a, Result<bool, TurnError>> {
            Box::pin(async { Ok(false) })
        }

        fn session_count(&self) -> BoxFuture<'_, usize> {
            Box::pin(async { 0 })
        }
    }

    #[test]
    fn server_builder_chain() {
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("127.0.0.1", 8090, Arc::new(NoopBackend), srx)
            .with_auth(Some("token".into()))
            .with_rate_limit(60)
            .with_max_body_size(512);

        assert_eq!(server.rate_limit, 60);
        assert_eq!(server.max_body_size, 512);
        assert!(server.auth_token.is_some());
        assert_eq!(server.addr().port(), 8090);
    }

    #[test]
    fn server_invalid_bind_fallback() {
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("not_an_ip", 9999, Arc::new(NoopBackend), srx);
        assert_eq!(server.addr(), SocketAddr::from(([127, 0, 0, 1], 9999)));
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let (stx, srx) = watch::channel(false);
        let server = GatewayServer::new("127.0.0.1", 0, Arc::new(NoopBackend), srx);
        let handle = tokio::spawn(server.serve());
        stx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
