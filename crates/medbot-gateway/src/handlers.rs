use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use medbot_core::TurnError;
use medbot_memory::SessionId;

use super::server::AppState;

#[derive(serde::Deserialize)]
pub(crate) struct MessagePayload {
    pub text: String,
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    sessions: usize,
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: &'static str,
    retryable: bool,
}

fn error_status(err: &TurnError) -> StatusCode {
    match err {
        TurnError::Validation(_) => StatusCode::BAD_REQUEST,
        TurnError::Busy => StatusCode::CONFLICT,
        TurnError::Retrieval { .. } | TurnError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        TurnError::Generation { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: &TurnError) -> Response {
    let status = error_status(err);
    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), "turn failed: {err}");
    }
    let body = ErrorResponse {
        error: err.user_message(),
        retryable: err.is_retryable(),
    };
    (status, Json(body)).into_response()
}

fn parse_session(raw: &str) -> Result<SessionId, Response> {
    raw.parse().map_err(|e: medbot_memory::session::InvalidSessionId| {
        (StatusCode::BAD_REQUEST, e.to_string()).into_response()
    })
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        sessions: state.backend.session_count().await,
    })
}

pub(crate) async fn message_handler(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(payload): Json<MessagePayload>,
) -> Response {
    let session = match parse_session(&session) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.backend.submit(&session, &payload.text).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => error_response(&e),
    }
}

pub(crate) async fn transcript_handler(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Response {
    let session = match parse_session(&session) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.backend.snapshot(&session).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e),
    }
}

pub(crate) async fn delete_handler(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Response {
    let session = match parse_session(&session) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.backend.remove(&session).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use medbot_core::RetrievalError;
    use medbot_core::error::GenerationStage;
    use medbot_llm::LlmError;

    use super::*;

    #[test]
    fn message_payload_deserializes() {
        let payload: MessagePayload = serde_json::from_str(r#"{"text":"What is flu?"}"#).unwrap();
        assert_eq!(payload.text, "What is flu?");
    }

    #[test]
    fn turn_errors_map_to_statuses() {
        let cases = [
            (TurnError::Validation("empty".into()), 400),
            (TurnError::Busy, 409),
            (TurnError::Cancelled, 503),
            (
                TurnError::Retrieval {
                    cause: RetrievalError::Embedding(LlmError::Timeout),
                },
                503,
            ),
            (
                TurnError::Generation {
                    stage: GenerationStage::Answer,
                    cause: LlmError::RateLimited,
                },
                502,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(error_status(&err).as_u16(), status, "{err}");
        }
    }

    #[test]
    fn invalid_session_id_is_bad_request() {
        let resp = parse_session("has spaces").unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(parse_session("user-1").is_ok());
    }
}
