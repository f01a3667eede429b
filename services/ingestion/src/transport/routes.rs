use super::*;

/// Single endpoint: the path is ignored, only the method matters.
pub(crate) fn handle_request(runtime: &IngestionRuntime, request: &HttpRequest) -> HttpResponse {
    tracing::debug!(
        method = %request.method,
        target = %request.target,
        content_type = request.headers.get("content-type").map(String::as_str),
        body_bytes = request.body.len(),
        "handling request"
    );
    match request.method.as_str() {
        "OPTIONS" => HttpResponse::preflight(),
        "POST" => match ingest_batch(runtime.config(), &request.body, runtime.now()) {
            Ok(saved) => respond_saved(runtime, &saved),
            Err(err) => respond_with_error(runtime, &err),
        },
        other => respond_with_error(runtime, &IngestError::MethodNotAllowed(other.to_string())),
    }
}

fn respond_saved(runtime: &IngestionRuntime, saved: &SavedBatch) -> HttpResponse {
    runtime.record(&IngestEvent::saved(saved));
    HttpResponse::saved(&SaveResponse::new(saved.filename.clone(), saved.rows))
}

/// Logs the full error and answers with the short client-facing message.
pub(crate) fn respond_with_error(runtime: &IngestionRuntime, error: &IngestError) -> HttpResponse {
    let reason = error.to_string();
    runtime.record(&IngestEvent::from_error(error, &reason));
    HttpResponse::error_with_status(error.status(), error.public_message())
}
