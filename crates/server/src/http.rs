use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use todo_auth::{Identity, OidcVerifier, StaticTokenSet};
use todo_store::{StoreError, TaskStore};
use ulid::Ulid;

use crate::config::{AuthMode, ServerConfig, StartupError};

mod todos;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    oidc: Option<OidcVerifier>,
    static_tokens: Option<StaticTokenSet>,
    store: TaskStore,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: ServerConfig) -> Result<Router, StartupError> {
    let oidc = if config.auth_mode == AuthMode::Oidc {
        let oidc_config = config.oidc.clone().ok_or_else(|| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "oidc auth mode requires oidc config".to_string(),
        })?;

        Some(
            OidcVerifier::new(oidc_config)
                .await
                .map_err(|err| StartupError {
                    code: "ERR_AUTH_UNAVAILABLE",
                    message: format!("failed to initialize oidc verifier: {}", err),
                })?,
        )
    } else {
        None
    };

    let store = TaskStore::connect_and_migrate(
        &config.db_url,
        Duration::from_millis(config.store_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to initialize task store: {}", err),
    })?;

    let static_tokens = config.static_tokens.clone();

    let state = AppState {
        config,
        oidc,
        static_tokens,
        store,
    };

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/todos", get(todos::list).post(todos::create))
        .route(
            "/todos/{id}",
            get(todos::fetch).put(todos::update).delete(todos::remove),
        )
        .with_state(state))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    store: bool,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_ready = state.store.ping().await.is_ok();

    let status = if store_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if store_ready { "ready" } else { "not_ready" },
            store: store_ready,
        }),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if state.config.metrics_require_auth
        && let Err(err) = extract_identity(&state, &headers).await
    {
        return err.into_response();
    }

    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Resolves the caller's identity before anything else runs. A
/// missing or rejected credential is always a 401; only an
/// unreachable verifier surfaces as a 503.
async fn extract_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    match state.config.auth_mode {
        AuthMode::Static => {
            let Some(tokens) = state.static_tokens.as_ref() else {
                return Err(json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ERR_INTERNAL",
                    "static token set is not initialized".to_string(),
                ));
            };

            tokens
                .verify(headers)
                .map_err(|err| json_error(StatusCode::UNAUTHORIZED, err.code, err.message))
        }
        AuthMode::Oidc => {
            let Some(verifier) = state.oidc.as_ref() else {
                return Err(json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ERR_INTERNAL",
                    "oidc verifier is not initialized".to_string(),
                ));
            };

            verifier.verify(headers).await.map_err(|err| match err.code {
                "ERR_AUTH_UNAVAILABLE" => {
                    json_error(StatusCode::SERVICE_UNAVAILABLE, err.code, err.message)
                }
                _ => json_error(StatusCode::UNAUTHORIZED, err.code, err.message),
            })
        }
    }
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
        }),
    )
}

/// Storage failures are logged with full detail and remapped to a
/// generic message so raw store errors never reach the caller.
fn store_error_response(operation: &'static str, err: &StoreError) -> ApiError {
    tracing::error!(operation, error = %err, "task store operation failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "ERR_STORE_UNAVAILABLE",
        "Task store is unavailable. Please try again later.",
    )
}
