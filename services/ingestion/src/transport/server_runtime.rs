use super::*;

type ConnectionQueue = Arc<Mutex<mpsc::Receiver<TcpStream>>>;

/// Accepts connections on `bind_addr` and hands them to `worker_count` threads.
pub fn serve_http_with_workers(
    runtime: IngestionRuntime,
    bind_addr: &str,
    worker_count: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    let worker_count = worker_count.max(1);
    tracing::info!(bind_addr, workers = worker_count, "trial ingest transport listening");

    let runtime: SharedRuntime = Arc::new(runtime);
    let (queue_tx, queue_rx) = mpsc::channel::<TcpStream>();
    let queue: ConnectionQueue = Arc::new(Mutex::new(queue_rx));

    std::thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let runtime = Arc::clone(&runtime);
            let queue = Arc::clone(&queue);
            scope.spawn(move || run_worker(worker_id, &runtime, &queue));
        }

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%err, "accepting connection failed");
                    continue;
                }
            };
            if queue_tx.send(stream).is_err() {
                tracing::error!("all ingest workers have stopped");
                break;
            }
        }
        drop(queue_tx);
    });

    Ok(())
}

fn run_worker(worker_id: usize, runtime: &IngestionRuntime, queue: &ConnectionQueue) {
    while let Some(stream) = next_connection(queue) {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        match serve_connection(runtime, stream) {
            Ok(Some(status)) => tracing::debug!(worker_id, %peer, status, "connection served"),
            Ok(None) => tracing::debug!(worker_id, %peer, "connection closed before a request"),
            Err(err) => tracing::warn!(worker_id, %peer, %err, "connection failed"),
        }
    }
}

/// `None` once the accept loop has hung up or the queue lock is poisoned.
fn next_connection(queue: &ConnectionQueue) -> Option<TcpStream> {
    let guard = queue.lock().ok()?;
    guard.recv().ok()
}

/// Reads one request, answers it and returns the status sent.
pub(super) fn serve_connection(
    runtime: &IngestionRuntime,
    mut stream: TcpStream,
) -> std::io::Result<Option<u16>> {
    let timeout = Some(Duration::from_secs(SOCKET_TIMEOUT_SECS));
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    let response = match read_http_request(&mut stream, runtime.config().max_body_bytes) {
        Ok(Some(request)) => handle_request(runtime, &request),
        Ok(None) => return Ok(None),
        Err(RequestReadError::BodyTooLarge { method }) => reject_oversized_body(runtime, &method),
        Err(RequestReadError::Malformed(reason)) => {
            tracing::warn!(%reason, "malformed HTTP request");
            HttpResponse::bad_request("Malformed HTTP request")
        }
    };
    let status = response.status;
    write_response(&mut stream, response)?;
    Ok(Some(status))
}
