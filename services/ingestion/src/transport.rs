use std::{
    collections::HashMap,
    net::{TcpListener, TcpStream},
    sync::{Arc, Mutex, mpsc},
    time::Duration,
};

use chrono::{Local, NaiveDateTime};

use crate::{
    SavedBatch,
    api::{ErrorResponse, IngestError, SaveResponse},
    ingest_batch,
};

mod config;
mod events;
mod http;
mod request;
mod routes;
mod server_runtime;

pub use config::{
    DEFAULT_BIND_ADDR, DEFAULT_DATA_DIR, DEFAULT_MAX_BODY_BYTES, IngestConfig, ServerConfig,
    TransportRuntime,
};
pub use events::{EventSink, IngestEvent, Outcome, RecordedEvent, RecordingSink, TracingSink};
#[cfg(feature = "async-transport")]
pub(crate) use http::CORS_HEADERS;
pub(crate) use http::{HttpRequest, HttpResponse};
pub use server_runtime::serve_http_with_workers;

use http::{render_response_text, write_response};
use request::{RequestReadError, parse_request_head, read_http_request};
pub(crate) use routes::handle_request;
use routes::respond_with_error;

pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Everything a request needs: immutable configuration, the event sink and
/// the clock used for file names. Shared across workers without locking.
pub struct IngestionRuntime {
    config: IngestConfig,
    sink: Arc<dyn EventSink>,
    clock: Clock,
}

impl IngestionRuntime {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            sink: Arc::new(TracingSink),
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    fn record(&self, event: &IngestEvent<'_>) {
        self.sink.record(event);
    }
}

pub type SharedRuntime = Arc<IngestionRuntime>;

const SOCKET_TIMEOUT_SECS: u64 = 5;

/// Runs one raw HTTP/1.1 request through the handler and returns the raw
/// response. `Err` means the bytes were not a usable HTTP request.
pub fn handle_http_request_bytes(
    runtime: &SharedRuntime,
    raw_request: &[u8],
) -> Result<Vec<u8>, String> {
    let header_end = raw_request
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| "missing HTTP header terminator".to_string())?;
    let header_block = std::str::from_utf8(&raw_request[..header_end])
        .map_err(|_| "request head must be valid UTF-8".to_string())?;
    let body = &raw_request[header_end + 4..];

    let head = parse_request_head(header_block.split("\r\n"))?;
    let content_length = head.content_length()?;
    if content_length > runtime.config().max_body_bytes {
        let response = reject_oversized_body(runtime, &head.method);
        return Ok(render_response_text(&response).into_bytes());
    }
    if content_length != body.len() {
        return Err("content-length does not match body size".to_string());
    }

    let request = head.into_request(body.to_vec());
    let response = handle_request(runtime, &request);
    Ok(render_response_text(&response).into_bytes())
}

/// Answers a request whose declared body is over the limit without reading it.
/// Non-POST methods still get their usual answer.
pub(crate) fn reject_oversized_body(runtime: &IngestionRuntime, method: &str) -> HttpResponse {
    if method == "POST" {
        return respond_with_error(
            runtime,
            &IngestError::PayloadTooLarge {
                limit: runtime.config().max_body_bytes,
            },
        );
    }
    let request = HttpRequest {
        method: method.to_string(),
        target: "/".to_string(),
        headers: HashMap::new(),
        body: Vec::new(),
    };
    handle_request(runtime, &request)
}
