use axum::Json;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use equipment_pipeline::{ValidationError, summarize_upload};
use tracing::Instrument;

use super::{
    ApiError, AppState, RequestScope, authenticate, internal_error, json_error, store_error,
    validation_error,
};

const FILE_FIELD: &str = "file";

pub(super) async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let scope = RequestScope::new("/upload", "POST", &headers);
    let span = tracing::info_span!(
        "upload.ingest",
        request_id = %scope.request_id,
        principal_id = tracing::field::Empty,
        file_bytes = tracing::field::Empty,
        summary_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    let result: Result<_, ApiError> = async {
        authenticate(&state, &headers).await?;

        let mut multipart = multipart.map_err(|_| {
            json_error(
                StatusCode::BAD_REQUEST,
                "ERR_INVALID_PARAMS",
                "expected a multipart/form-data body",
            )
        })?;
        let (file_name, bytes) = read_file_field(&mut multipart).await?;
        tracing::Span::current().record("file_bytes", bytes.len() as u64);

        let declared_size = bytes.len() as u64;
        let summarized = tokio::task::spawn_blocking(move || {
            summarize_upload(&file_name, declared_size, bytes.as_ref())
        })
        .await
        .map_err(|_| internal_error("upload validation task failed"))?;

        let stats = match summarized {
            Ok(stats) => stats,
            Err(err) => return Err(reject(&err)),
        };

        let stored = state
            .store
            .insert_and_prune(&stats)
            .await
            .map_err(store_error)?;
        tracing::Span::current().record("summary_id", stored.id);
        crate::metrics::observe_upload("accepted");

        if let Ok(count) = state.store.count().await {
            crate::metrics::set_retained_summaries(count);
        }

        Ok(Json(stored.stats))
    }
    .instrument(span.clone())
    .await;

    scope.finish(&span, result)
}

fn reject(err: &ValidationError) -> ApiError {
    crate::metrics::observe_upload(err.code());
    validation_error(err)
}

/// Pull the `file` part out of the form, skipping any other parts. A body
/// that overflows the transport limit is reported as an oversized file.
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes), ApiError> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                return Err(json_error(
                    StatusCode::BAD_REQUEST,
                    "ERR_INVALID_PARAMS",
                    "No file uploaded",
                ));
            }
            Err(err) => return Err(multipart_failure(err.status())),
        };

        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| multipart_failure(err.status()))?;
        return Ok((file_name, bytes));
    }
}

fn multipart_failure(status: StatusCode) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return reject(&ValidationError::TooLarge);
    }
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        "malformed multipart body",
    )
}
