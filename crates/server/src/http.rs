use std::collections::BTreeMap;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use equipment_auth::{AuthError, Authenticator, Principal};
use equipment_contracts::ErrorBody;
use equipment_pipeline::{MAX_UPLOAD_BYTES, ValidationError};
use equipment_store::{StoreError, SummaryStore};
use serde::Serialize;
use tracing::Span;
use ulid::Ulid;

use crate::config::{ServerConfig, StartupError};

mod accounts;
mod summaries;
mod upload;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Multipart framing overhead allowed on top of the largest accepted file.
const UPLOAD_BODY_SLACK_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    store: SummaryStore,
    auth: Authenticator,
}

type ApiError = (StatusCode, Json<ErrorBody>);

impl AppState {
    pub async fn init(config: ServerConfig) -> Result<Self, StartupError> {
        let store = SummaryStore::connect_and_migrate(&config.store_options())
            .await
            .map_err(|err| StartupError {
                code: "ERR_DB_UNAVAILABLE",
                message: format!("failed to initialize summary store: {}", err),
            })?;

        let auth = Authenticator::new(store.pool().clone(), config.auth_config()).map_err(
            |err| StartupError {
                code: err.code,
                message: err.message,
            },
        )?;

        if let Ok(count) = store.count().await {
            crate::metrics::set_retained_summaries(count);
        }

        Ok(Self {
            config,
            store,
            auth,
        })
    }

    pub fn store(&self) -> &SummaryStore {
        &self.store
    }
}

pub async fn router(config: ServerConfig) -> Result<Router, StartupError> {
    Ok(router_with_state(AppState::init(config).await?))
}

pub fn router_with_state(state: AppState) -> Router {
    let upload_body_limit = usize::try_from(MAX_UPLOAD_BYTES)
        .unwrap_or(usize::MAX)
        .saturating_add(UPLOAD_BODY_SLACK_BYTES);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/signup", post(accounts::signup))
        .route("/token", post(accounts::token))
        .route(
            "/upload",
            post(upload::upload).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/history", get(summaries::history))
        .route("/report", get(summaries::report))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();
    checks.insert("store", state.store.ping().await.is_ok());

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if state.config.metrics_require_auth
        && let Err(err) = authenticate(&state, &headers).await
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

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let principal = state.auth.authenticate(headers).await.map_err(auth_error)?;
    Span::current().record("principal_id", principal.username.as_str());
    Ok(principal)
}

/// Per-request bookkeeping shared by every data endpoint: request id, span
/// timing, metrics and the echoed `x-request-id` header.
struct RequestScope {
    route: &'static str,
    method: &'static str,
    request_id: String,
    started: Instant,
}

impl RequestScope {
    fn new(route: &'static str, method: &'static str, headers: &HeaderMap) -> Self {
        Self {
            route,
            method,
            request_id: extract_request_id(headers),
            started: Instant::now(),
        }
    }

    fn finish<T: IntoResponse>(self, span: &Span, result: Result<T, ApiError>) -> Response {
        let (mut response, outcome) = match result {
            Ok(body) => (body.into_response(), "ok".to_string()),
            Err((status, Json(body))) => {
                let outcome = body
                    .code
                    .clone()
                    .unwrap_or_else(|| "ERR_INTERNAL".to_string());
                ((status, Json(body)).into_response(), outcome)
            }
        };

        let elapsed = self.started.elapsed();
        let status = response.status().as_u16();
        span.record("latency_ms", elapsed.as_millis() as u64);
        span.record("outcome", outcome.as_str());
        span.in_scope(|| {
            if status >= 500 {
                tracing::warn!(status, "request failed");
            } else {
                tracing::info!(status, "request finished");
            }
        });

        crate::metrics::observe_http_request(self.route, self.method, status, elapsed);

        if let Ok(value) = HeaderValue::from_str(&self.request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
            code: Some(code.into()),
        }),
    )
}

fn internal_error(message: &str) -> ApiError {
    tracing::warn!(reason = message, "internal error");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "ERR_INTERNAL",
        "internal server error",
    )
}

fn validation_error(err: &ValidationError) -> ApiError {
    json_error(StatusCode::BAD_REQUEST, err.code(), err.to_string())
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::Timeout => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ERR_DB_TIMEOUT",
            "summary store timed out",
        ),
        other => {
            tracing::warn!(error = %other, "summary store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_INTERNAL",
                "internal server error",
            )
        }
    }
}

fn auth_error(err: AuthError) -> ApiError {
    let status = match err.code {
        "ERR_AUTH_REQUIRED" | "ERR_AUTH_INVALID" => StatusCode::UNAUTHORIZED,
        "ERR_INVALID_PARAMS" | "ERR_USERNAME_TAKEN" | "ERR_INVALID_CREDENTIALS" => {
            StatusCode::BAD_REQUEST
        }
        "ERR_DB_TIMEOUT" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        return internal_error(&err.message);
    }
    json_error(status, err.code, err.message)
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
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
