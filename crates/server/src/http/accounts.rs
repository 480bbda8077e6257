use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use equipment_contracts::{Credentials, MessageResponse, TokenResponse};
use tracing::Instrument;

use super::{ApiError, AppState, RequestScope, auth_error, json_error};

pub(super) async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<Credentials>, JsonRejection>,
) -> Response {
    let scope = RequestScope::new("/signup", "POST", &headers);
    let span = tracing::info_span!(
        "auth.signup",
        request_id = %scope.request_id,
        principal_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    let result: Result<_, ApiError> = async {
        let Json(credentials) = req.map_err(|_| {
            json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_PARAMS",
                "Username and password required",
            )
        })?;
        tracing::Span::current().record("principal_id", credentials.username.trim());

        state.auth.signup(&credentials).await.map_err(auth_error)?;
        Ok((
            StatusCode::CREATED,
            Json(MessageResponse {
                message: "User created successfully".to_string(),
            }),
        ))
    }
    .instrument(span.clone())
    .await;

    scope.finish(&span, result)
}

pub(super) async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<Credentials>, JsonRejection>,
) -> Response {
    let scope = RequestScope::new("/token", "POST", &headers);
    let span = tracing::info_span!(
        "auth.token",
        request_id = %scope.request_id,
        principal_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    let result: Result<_, ApiError> = async {
        let Json(credentials) = req.map_err(|_| {
            json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_CREDENTIALS",
                "Unable to log in with provided credentials.",
            )
        })?;
        tracing::Span::current().record("principal_id", credentials.username.trim());

        let token = state
            .auth
            .issue_token(&credentials)
            .await
            .map_err(auth_error)?;
        Ok(Json(TokenResponse { token }))
    }
    .instrument(span.clone())
    .await;

    scope.finish(&span, result)
}
