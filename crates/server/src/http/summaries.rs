use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use equipment_contracts::HistoryEntry;
use equipment_report::{ATTACHMENT_FILENAME, CONTENT_TYPE, ReportError};
use tracing::Instrument;

use super::{ApiError, AppState, RequestScope, authenticate, internal_error, json_error, store_error};

pub(super) async fn history(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let scope = RequestScope::new("/history", "GET", &headers);
    let span = tracing::info_span!(
        "history.list",
        request_id = %scope.request_id,
        principal_id = tracing::field::Empty,
        entries = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    let result: Result<_, ApiError> = async {
        authenticate(&state, &headers).await?;

        let recent = state
            .store
            .list_recent(state.store.retention_limit())
            .await
            .map_err(store_error)?;
        tracing::Span::current().record("entries", recent.len() as u64);

        Ok(Json(recent.iter().map(HistoryEntry::from).collect::<Vec<_>>()))
    }
    .instrument(span.clone())
    .await;

    scope.finish(&span, result)
}

pub(super) async fn report(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let scope = RequestScope::new("/report", "GET", &headers);
    let span = tracing::info_span!(
        "report.render",
        request_id = %scope.request_id,
        principal_id = tracing::field::Empty,
        summary_id = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );

    let result: Result<_, ApiError> = async {
        authenticate(&state, &headers).await?;

        let latest = state.store.latest().await.map_err(store_error)?;
        if let Some(summary) = latest.as_ref() {
            tracing::Span::current().record("summary_id", summary.id);
        }

        let rendered =
            tokio::task::spawn_blocking(move || equipment_report::render(latest.as_ref()))
                .await
                .map_err(|_| internal_error("report rendering task failed"))?;

        let pdf = match rendered {
            Ok(pdf) => pdf,
            Err(ReportError::NoData) => {
                return Err(json_error(
                    StatusCode::NOT_FOUND,
                    "ERR_NO_DATA",
                    ReportError::NoData.to_string(),
                ));
            }
            Err(err @ ReportError::Encode(_)) => return Err(internal_error(&err.to_string())),
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
        let disposition = HeaderValue::from_str(&equipment_report::content_disposition())
            .map_err(|_| internal_error("invalid content disposition"))?;
        headers.insert(header::CONTENT_DISPOSITION, disposition);
        tracing::debug!(filename = ATTACHMENT_FILENAME, bytes = pdf.len(), "report rendered");

        Ok((headers, pdf).into_response())
    }
    .instrument(span.clone())
    .await;

    scope.finish(&span, result)
}
