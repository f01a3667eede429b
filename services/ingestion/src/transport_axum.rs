use std::{collections::HashMap, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderName, HeaderValue, Request, Response, StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::any,
};

use crate::{
    api::IngestError,
    transport::{
        CORS_HEADERS, HttpRequest, HttpResponse, IngestionRuntime, SharedRuntime, handle_request,
        reject_oversized_body,
    },
};

#[derive(Clone)]
struct AppState {
    runtime: SharedRuntime,
}

pub fn serve_http_with_axum(
    ingestion_runtime: IngestionRuntime,
    bind_addr: &str,
    worker_threads: usize,
) -> Result<(), String> {
    let worker_threads = worker_threads.max(1);
    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build tokio runtime: {e}"))?;

    let bind_addr = bind_addr.to_string();
    tokio_runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| format!("failed to bind {bind_addr}: {e}"))?;

        axum::serve(listener, router(Arc::new(ingestion_runtime)))
            .await
            .map_err(|e| format!("axum server failed: {e}"))
    })
}

fn router(runtime: SharedRuntime) -> Router {
    let max_body_bytes = runtime.config().max_body_bytes;
    Router::new()
        .fallback(any(dispatch))
        .with_state(AppState { runtime })
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> impl IntoResponse {
    let method = request.method().to_string();
    let target = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let mut headers = HashMap::new();
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }

    let max_body_bytes = state.runtime.config().max_body_bytes;
    let declared_too_large = headers
        .get("content-length")
        .and_then(|raw| raw.parse::<usize>().ok())
        .is_some_and(|length| length > max_body_bytes);
    if declared_too_large {
        return response_from_transport(reject_oversized_body(&state.runtime, &method));
    }

    let body = match to_bytes(request.into_body(), max_body_bytes).await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => {
            tracing::warn!(%err, "reading request body failed");
            return response_from_transport(reject_oversized_body(&state.runtime, &method));
        }
    };

    let request = HttpRequest {
        method,
        target,
        headers,
        body,
    };

    let runtime = Arc::clone(&state.runtime);
    let response = tokio::task::spawn_blocking(move || handle_request(&runtime, &request))
        .await
        .unwrap_or_else(|err| {
            tracing::error!(%err, "ingest worker task failed");
            let error = IngestError::WriteFailure {
                participant_id: String::new(),
                detail: err.to_string(),
            };
            HttpResponse::error_with_status(error.status(), error.public_message())
        });
    response_from_transport(response)
}

fn response_from_transport(response: HttpResponse) -> Response<Body> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;
    let headers = out.headers_mut();
    for (name, value) in CORS_HEADERS {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(response.content_type));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{IngestConfig, RecordingSink};
    use chrono::NaiveDate;

    fn sample_state(data_dir: &std::path::Path, max_body_bytes: usize) -> AppState {
        let runtime = IngestionRuntime::new(
            IngestConfig::new(data_dir).with_max_body_bytes(max_body_bytes),
        )
        .with_event_sink(Arc::new(RecordingSink::new()))
        .with_clock(|| {
            NaiveDate::from_ymd_opt(2026, 3, 14)
                .unwrap()
                .and_hms_opt(9, 26, 53)
                .unwrap()
        });
        AppState {
            runtime: Arc::new(runtime),
        }
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn dispatch_post_saves_batch() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/save_data")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"[{"participant_id":"P1","rt":310}]"#))
            .unwrap();
        let response = dispatch(State(sample_state(dir.path(), 1024)), request)
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        let body = body_text(response).await;
        assert!(body.contains(r#""filename":"participant_P1_2026-03-14_092653_vunknown.csv""#));
        assert!(body.contains(r#""rows":1"#));
    }

    #[tokio::test]
    async fn dispatch_options_returns_empty_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = dispatch(State(sample_state(dir.path(), 1024)), request)
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-methods").unwrap(),
            "POST, OPTIONS"
        );
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_rejects_oversized_body_with_413() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(vec![b' '; 64]))
            .unwrap();
        let response = dispatch(State(sample_state(dir.path(), 16)), request)
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body_text(response).await.contains("Data too large"));
    }

    #[tokio::test]
    async fn dispatch_get_is_method_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder()
            .method("GET")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = dispatch(State(sample_state(dir.path(), 1024)), request)
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            body_text(response).await,
            r#"{"success":false,"error":"Method not allowed"}"#
        );
    }
}
