use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{delete_handler, health_handler, message_handler, transcript_handler};
use super::server::AppState;

#[derive(Clone)]
struct AuthConfig {
    token: Option<String>,
}

const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;
const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct RateLimitState {
    limit: u32,
    counters: Arc<Mutex<HashMap<IpAddr, (u32, Instant)>>>,
}

pub(crate) struct RouterLimits {
    pub auth_token: Option<String>,
    pub rate_limit: u32,
    pub max_body_size: usize,
}

pub(crate) fn build_router(state: AppState, limits: RouterLimits) -> Router {
    let auth_cfg = AuthConfig {
        token: limits.auth_token,
    };
    let rate_state = RateLimitState {
        limit: limits.rate_limit,
        counters: Arc::new(Mutex::new(HashMap::new())),
    };

    let sessions = Router::new()
        .route("/v1/sessions/{id}/messages", post(message_handler))
        .route("/v1/sessions/{id}/transcript", get(transcript_handler))
        .route("/v1/sessions/{id}", axum::routing::delete(delete_handler))
        .layer(middleware::from_fn_with_state(
            rate_state,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(auth_cfg, auth_middleware))
        .layer(RequestBodyLimitLayer::new(limits.max_body_size));

    Router::new()
        .route("/health", get(health_handler))
        .merge(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(
    State(cfg): State<AuthConfig>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(ref expected) = cfg.token {
        let token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        // fixed-length digests so the comparison does not leak the token length
        let token_hash = blake3::hash(token.as_bytes());
        let expected_hash = blake3::hash(expected.as_bytes());
        if !bool::from(token_hash.as_bytes().ct_eq(expected_hash.as_bytes())) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    next.run(req).await
}

async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.limit == 0 {
        return next.run(req).await;
    }

    let ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), |ci| ci.0.ip());

    let now = Instant::now();
    let mut counters = state.counters.lock().await;

    if counters.len() >= MAX_RATE_LIMIT_ENTRIES && !counters.contains_key(&ip) {
        counters.retain(|_, (_, ts)| now.duration_since(*ts) < RATE_WINDOW);
    }

    let entry = counters.entry(ip).or_insert((0, now));
    if now.duration_since(entry.1) >= RATE_WINDOW {
        *entry = (1, now);
    } else {
        entry.0 += 1;
        if entry.0 > state.limit {
            tracing::debug!(%ip, "rate limit exceeded");
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }
    drop(counters);

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::Body;
    use futures::future::BoxFuture;
    use http_body_util::BodyExt;
    use medbot_core::TurnError;
    use medbot_core::session::{Answer, ChatBackend, SessionSnapshot};
    use medbot_memory::SessionId;
    use tower::ServiceExt;

    use super::*;

    /// Answers every message with its own text and remembers which sessions it saw.
    #[derive(Default)]
    struct EchoBackend {
        sessions: std::sync::Mutex<Vec<SessionId>>,
        calls: AtomicUsize,
        busy: bool,
    }

    impl ChatBackend for EchoBackend {
        fn submit<'a>(
            &'a self,
            session: &'a SessionId,
            text: &'a str,
        ) -> BoxFuture<'a, Result<Answer, TurnError>> {
            Box::pin(async move {
                if text.trim().is_empty() {
                    return Err(TurnError::Validation("message is empty".into()));
                }
                if self.busy {
                    return Err(TurnError::Busy);
                }
                self.calls.fetch_add(1, Ordering::SeqCst);
                let mut sessions = self.sessions.lock().unwrap();
                if !sessions.contains(session) {
                    sessions.push(session.clone());
                }
                Ok(Answer {
                    text: format!("echo: {text}"),
                    standalone_question: text.to_owned(),
                    sources: vec![],
                })
            })
        }

        fn snapshot<'a>(
            &'a self,
            session: &'a SessionId,
        ) -> BoxFuture<'a, Result<Option<SessionSnapshot>, TurnError>> {
            Box::pin(async move {
                let known = self.sessions.lock().unwrap().contains(session);
                Ok(known.then(|| SessionSnapshot {
                    id: session.clone(),
                    generating: false,
                    exchanges: self.calls.load(Ordering::SeqCst),
                    transcript: vec![],
                }))
            })
        }

        fn remove<'a>(&'a self, session: &'a SessionId) -> BoxFuture<'a, Result<bool, TurnError>> {
            Box::pin(async move {
                let mut sessions = self.sessions.lock().unwrap();
                let before = sessions.len();
                sessions.retain(|s| s != session);
                Ok(sessions.len() < before)
            })
        }

        fn session_count(&self) -> BoxFuture<'_, usize> {
            Box::pin(async move { self.sessions.lock().unwrap().len() })
        }
    }

    fn make_router_with(backend: EchoBackend, auth: Option<String>, rate_limit: u32) -> Router {
        let state = AppState {
            backend: Arc::new(backend),
            started_at: Instant::now(),
        };
        build_router(
            state,
            RouterLimits {
                auth_token: auth,
                rate_limit,
                max_body_size: 1_048_576,
            },
        )
    }

    fn make_router(auth: Option<String>, rate_limit: u32) -> Router {
        make_router_with(EchoBackend::default(), auth, rate_limit)
    }

    fn message(session: &str, text: &str) -> Request<Body> {
        let body = serde_json::json!({ "text": text });
        Request::builder()
            .method("POST")
            .uri(format!("/v1/sessions/{session}/messages"))
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = make_router(None, 0);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sessions"], 0);
    }

    #[tokio::test]
    async fn message_returns_answer_json() {
        let app = make_router(None, 0);
        let resp = app.oneshot(message("alice", "What is flu?")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = json_body(resp).await;
        assert_eq!(json["text"], "echo: What is flu?");
        assert_eq!(json["standalone_question"], "What is flu?");
        assert!(json["sources"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let app = make_router(None, 0);
        let resp = app.oneshot(message("alice", "   ")).await.unwrap();
        assert_eq!(resp.status(), 400);
        let json = json_body(resp).await;
        assert_eq!(json["error"], "Please type a question first.");
        assert_eq!(json["retryable"], false);
    }

    #[tokio::test]
    async fn busy_session_is_conflict() {
        let backend = EchoBackend {
            busy: true,
            ..EchoBackend::default()
        };
        let app = make_router_with(backend, None, 0);
        let resp = app.oneshot(message("alice", "hello")).await.unwrap();
        assert_eq!(resp.status(), 409);
        assert_eq!(json_body(resp).await["retryable"], true);
    }

    #[tokio::test]
    async fn invalid_session_id_rejected() {
        let app = make_router(None, 0);
        let resp = app.oneshot(message("a%20b", "hello")).await.unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn transcript_and_delete_for_unknown_session_are_not_found() {
        let app = make_router(None, 0);
        let req = Request::builder()
            .uri("/v1/sessions/nobody/transcript")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);

        let req = Request::builder()
            .method("DELETE")
            .uri("/v1/sessions/nobody")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn transcript_and_delete_after_message() {
        let app = make_router(None, 0);
        let resp = app.clone().oneshot(message("bob", "hi")).await.unwrap();
        assert_eq!(resp.status(), 200);

        let req = Request::builder()
            .uri("/v1/sessions/bob/transcript")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json = json_body(resp).await;
        assert_eq!(json["id"], "bob");
        assert_eq!(json["generating"], false);

        let req = Request::builder()
            .method("DELETE")
            .uri("/v1/sessions/bob")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 204);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(json_body(resp).await["sessions"], 0);

        let req = Request::builder()
            .uri("/v1/sessions/bob/transcript")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn auth_rejects_missing_token() {
        let app = make_router(Some("secret".into()), 0);
        let resp = app.oneshot(message("alice", "hello")).await.unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn auth_accepts_valid_token() {
        let app = make_router(Some("secret".into()), 0);
        let mut req = message("alice", "hello");
        req.headers_mut()
            .insert("authorization", "Bearer secret".parse().unwrap());
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn auth_rejects_wrong_token() {
        let app = make_router(Some("secret".into()), 0);
        let mut req = message("alice", "hello");
        req.headers_mut()
            .insert("authorization", "Bearer wrong".parse().unwrap());
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn health_skips_auth() {
        let app = make_router(Some("secret".into()), 0);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn rate_limit_enforced() {
        use tower::Service;

        let mut app = make_router(None, 2);
        let resp = app.call(message("alice", "one")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let resp = app.call(message("alice", "two")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let resp = app.call(message("alice", "three")).await.unwrap();
        assert_eq!(resp.status(), 429);
    }

    #[tokio::test]
    async fn body_size_limit() {
        let state = AppState {
            backend: Arc::new(EchoBackend::default()),
            started_at: Instant::now(),
        };
        let app = build_router(
            state,
            RouterLimits {
                auth_token: None,
                rate_limit: 0,
                max_body_size: 64,
            },
        );
        let oversized = serde_json::json!({ "text": "a".repeat(128) });
        let req = Request::builder()
            .method("POST")
            .uri("/v1/sessions/alice/messages")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&oversized).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 413);
    }
}
