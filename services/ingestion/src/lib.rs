pub mod api;
pub mod transport;
#[cfg(feature = "async-transport")]
pub mod transport_axum;

use std::path::PathBuf;

use chrono::NaiveDateTime;
use schema::{BatchMetadata, decode_batch, extract_metadata, resolve_column_order};
use store::{StoreError, ensure_data_dir, plan_file_name, write_csv_file_atomic};

use crate::{api::IngestError, transport::IngestConfig};

/// A batch that reached disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBatch {
    pub filename: String,
    pub path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
    pub metadata: BatchMetadata,
}

/// Validates one request body and persists it as a participant CSV file.
///
/// Checks run in this order: data directory, empty body, size limit, JSON
/// syntax, payload shape, `participant_id`. The file name is derived from
/// `saved_at`, so callers control the clock.
pub fn ingest_batch(
    config: &IngestConfig,
    body: &[u8],
    saved_at: NaiveDateTime,
) -> Result<SavedBatch, IngestError> {
    ensure_data_dir(&config.data_dir)
        .map_err(|err| IngestError::DirectoryUnavailable(err.to_string()))?;

    if body.is_empty() {
        return Err(IngestError::EmptyBody);
    }
    if body.len() > config.max_body_bytes {
        return Err(IngestError::PayloadTooLarge {
            limit: config.max_body_bytes,
        });
    }

    let batch = decode_batch(body)?;
    let metadata = extract_metadata(&batch)?;

    let filename = plan_file_name(
        &metadata.participant_id,
        metadata.version_or_unknown(),
        &saved_at,
    );
    let path = config.data_dir.join(&filename);
    let columns = resolve_column_order(&batch);
    let rows = write_csv_file_atomic(&path, &columns, &batch).map_err(|err| match err {
        StoreError::DirectoryUnavailable { .. } => {
            IngestError::DirectoryUnavailable(err.to_string())
        }
        StoreError::Write { .. } => IngestError::WriteFailure {
            participant_id: metadata.participant_id.clone(),
            detail: err.to_string(),
        },
    })?;

    Ok(SavedBatch {
        filename,
        path,
        rows,
        columns,
        metadata,
    })
}
