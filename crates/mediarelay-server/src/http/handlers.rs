//! HTTP request handlers for media streaming endpoints.

use crate::server::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use mediarelay_core::{ByteRangeSpec, StreamError, StreamerStatus};
use serde::Serialize;
use std::sync::Arc;

/// How the browser should present the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Play or display in place
    Inline,
    /// Save to disk
    Attachment,
}

impl Disposition {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }

    const fn route(self) -> &'static str {
        match self {
            Self::Inline => "stream",
            Self::Attachment => "dl",
        }
    }
}

/// Handle GET /stream/{file_id} endpoint.
///
/// Serves the file, or the requested byte range of it, for in-place playback.
pub async fn handle_stream(
    Path(file_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    respond(&state, &file_id, &headers, Disposition::Inline).await
}

/// Handle GET /dl/{file_id} endpoint.
///
/// Same as `/stream` but asks the browser to save the file.
pub async fn handle_download(
    Path(file_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    respond(&state, &file_id, &headers, Disposition::Attachment).await
}

async fn respond(
    state: &AppState,
    file_id: &str,
    headers: &HeaderMap,
    disposition: Disposition,
) -> Response {
    let response = match serve_media(state, file_id, headers, disposition).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    state
        .metrics()
        .record_response(disposition.route(), response.status().as_u16());
    response
}

async fn serve_media(
    state: &AppState,
    file_id: &str,
    headers: &HeaderMap,
    disposition: Disposition,
) -> Result<Response, AppError> {
    let range = requested_range(headers);
    tracing::debug!("Handling {} request for {file_id}, range {range:?}", disposition.route());

    let media = state.streamer().open(file_id, range).await?;
    let plan = media.plan;

    let name = media.descriptor.display_name();
    let content_type = HeaderValue::from_str(media.descriptor.content_type())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let file_id = file_id.to_string();
    let body = media.body.inspect_err(move |err| {
        tracing::error!("Stream of {file_id} aborted: {err}");
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = if plan.partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plan.length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(disposition, &name),
    );
    if plan.partial
        && let Ok(value) = HeaderValue::from_str(&plan.content_range())
    {
        headers.insert(header::CONTENT_RANGE, value);
    }

    Ok(response)
}

/// Parse the `Range` header; unsupported or malformed ranges are ignored and
/// the whole file is served.
fn requested_range(headers: &HeaderMap) -> Option<ByteRangeSpec> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    match value.parse() {
        Ok(range) => Some(range),
        Err(e) => {
            tracing::debug!("Ignoring range header {value:?}: {e}");
            None
        }
    }
}

fn content_disposition(disposition: Disposition, name: &str) -> HeaderValue {
    let safe: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    HeaderValue::from_str(&format!("{}; filename=\"{safe}\"", disposition.as_str()))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// JSON body of `/status`
#[derive(Debug, Serialize)]
pub struct StatusBody {
    /// Engine snapshot
    #[serde(flatten)]
    pub streamer: StreamerStatus,
    /// Base of generated links
    pub public_url: String,
}

/// Handle GET /status endpoint.
///
/// Returns uptime, per-connection load and cache/session counters as JSON.
pub async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusBody> {
    Json(StatusBody {
        streamer: state.streamer().status(),
        public_url: state.public_base().to_string(),
    })
}

/// Handle GET /metrics endpoint.
///
/// Returns Prometheus text exposition.
pub async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    state.metrics().update(&state.streamer().status());

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics().gather(),
    )
        .into_response()
}

/// Application-level error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Failure reported by the streaming engine
    Stream(StreamError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Self::Stream(err) = self;

        match err {
            StreamError::InvalidRange { file_size, reason } => {
                tracing::debug!("Unsatisfiable range: {reason}");
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{file_size}"))],
                    "416: Range Not Satisfiable",
                )
                    .into_response()
            }
            err if err.is_not_found() => {
                (StatusCode::NOT_FOUND, "404: File not found").into_response()
            }
            err => {
                tracing::error!("Failed to serve media: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "500: Internal Server Error",
                )
                    .into_response()
            }
        }
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        Self::Stream(err)
    }
}
