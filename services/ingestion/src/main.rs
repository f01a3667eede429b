use std::{fs::OpenOptions, path::Path, sync::Mutex};

use ingestion::transport::{
    IngestConfig, IngestionRuntime, ServerConfig, TransportRuntime, serve_http_with_workers,
};
use store::ensure_data_dir;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

fn main() {
    let server_config = ServerConfig::from_env();
    if let Err(err) = init_tracing(server_config.error_log_path.as_deref()) {
        eprintln!("ingestion failed opening error log: {err}");
        std::process::exit(1);
    }

    let ingest_config = IngestConfig::from_env();
    // A missing data directory is retried per request, so startup carries on.
    if let Err(err) = ensure_data_dir(&ingest_config.data_dir) {
        tracing::warn!(%err, "data directory is not ready");
    }

    let bind_addr = server_config.bind_addr.as_str();
    let http_workers = server_config.http_workers;
    println!("ingestion transport listening on http://{bind_addr}");
    println!("ingestion transport workers: {http_workers}");
    println!(
        "ingestion transport runtime: {}",
        server_config.transport_runtime.as_str()
    );
    println!(
        "ingestion data dir: {} (max body {} bytes)",
        ingest_config.data_dir.display(),
        ingest_config.max_body_bytes
    );
    if let Some(path) = server_config.error_log_path.as_deref() {
        println!("ingestion error log: {}", path.display());
    }

    let runtime = IngestionRuntime::new(ingest_config);
    match server_config.transport_runtime {
        TransportRuntime::Std => {
            if let Err(err) = serve_http_with_workers(runtime, bind_addr, http_workers) {
                eprintln!("ingestion transport failed: {err}");
                std::process::exit(1);
            }
        }
        TransportRuntime::Axum => {
            #[cfg(feature = "async-transport")]
            {
                if let Err(err) =
                    ingestion::transport_axum::serve_http_with_axum(runtime, bind_addr, http_workers)
                {
                    eprintln!("ingestion transport failed: {err}");
                    std::process::exit(1);
                }
            }
            #[cfg(not(feature = "async-transport"))]
            {
                eprintln!(
                    "ingestion transport runtime 'axum' requires build feature 'async-transport'"
                );
                std::process::exit(2);
            }
        }
    }
}

/// Console output follows `RUST_LOG`; the optional error log only gets warnings and errors.
fn init_tracing(error_log_path: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let error_log_layer = match error_log_path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::WARN),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(error_log_layer)
        .init();
    Ok(())
}
