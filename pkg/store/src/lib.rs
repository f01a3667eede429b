use std::{
    borrow::Cow,
    fs::{self, OpenOptions, remove_file, rename},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::NaiveDateTime;
use schema::Batch;
use thiserror::Error;

pub const CSV_FILE_SUFFIX: &str = ".csv";
const SAVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

static TEMP_FILE_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("data directory '{}' unavailable: {reason}", path.display())]
    DirectoryUnavailable { path: PathBuf, reason: String },
    #[error("writing '{}' failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// Data directory
// ---------------------------------------------------------------------------

/// Creates the data directory when missing and checks that it can take new files.
pub fn ensure_data_dir(path: &Path) -> Result<(), StoreError> {
    let unavailable = |reason: String| StoreError::DirectoryUnavailable {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        create_data_dir(path).map_err(|e| unavailable(format!("creating directory failed: {e}")))?;
    }
    let metadata =
        fs::metadata(path).map_err(|e| unavailable(format!("reading metadata failed: {e}")))?;
    if !metadata.is_dir() {
        return Err(unavailable("path is not a directory".to_string()));
    }
    // Mode bits say nothing about the owner, so try a real file.
    tempfile::Builder::new()
        .prefix(".write-check")
        .tempfile_in(path)
        .map_err(|e| unavailable(format!("directory is not writable: {e}")))?;
    Ok(())
}

#[cfg(unix)]
fn create_data_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
}

#[cfg(not(unix))]
fn create_data_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// Maps every byte outside `[A-Za-z0-9_-]` to `_`, so the result has the
/// same byte length as the input. `ë` (two bytes) becomes `__`.
pub fn sanitize_participant_id(raw: &str) -> String {
    raw.bytes()
        .map(|byte| match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => char::from(byte),
            _ => '_',
        })
        .collect()
}

/// Like [`sanitize_participant_id`] but keeps dots, so `1.2` stays readable.
pub fn sanitize_version(raw: &str) -> String {
    raw.bytes()
        .map(|byte| match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => char::from(byte),
            _ => '_',
        })
        .collect()
}

pub fn format_save_timestamp(saved_at: &NaiveDateTime) -> String {
    saved_at.format(SAVE_TIMESTAMP_FORMAT).to_string()
}

/// `participant_<id>_<YYYY-MM-DD_HHMMSS>_v<version>.csv`
///
/// Pure: two saves for the same participant and version within one second get
/// the same name, and the later one replaces the earlier file.
pub fn plan_file_name(participant_id: &str, version: &str, saved_at: &NaiveDateTime) -> String {
    format!(
        "participant_{}_{}_v{}{CSV_FILE_SUFFIX}",
        sanitize_participant_id(participant_id),
        format_save_timestamp(saved_at),
        sanitize_version(version)
    )
}

// ---------------------------------------------------------------------------
// CSV encoding
// ---------------------------------------------------------------------------

/// Quotes a field when it holds a delimiter, a quote or a line break.
pub fn escape_csv_field(raw: &str) -> Cow<'_, str> {
    if !raw.contains([',', '"', '\n', '\r']) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for ch in raw.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    Cow::Owned(out)
}

fn write_csv_row<'a, W, I>(out: &mut W, fields: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a str>,
{
    for (index, field) in fields.into_iter().enumerate() {
        if index > 0 {
            out.write_all(b",")?;
        }
        out.write_all(escape_csv_field(field).as_bytes())?;
    }
    out.write_all(b"\n")
}

/// Header row, then one row per record; absent fields become empty cells.
pub fn write_csv<W: Write>(out: &mut W, columns: &[String], batch: &Batch) -> io::Result<()> {
    write_csv_row(out, columns.iter().map(String::as_str))?;
    let mut cells = Vec::with_capacity(columns.len());
    for record in batch {
        cells.clear();
        cells.extend(columns.iter().map(|column| {
            record
                .get(column)
                .map(ToString::to_string)
                .unwrap_or_default()
        }));
        write_csv_row(out, cells.iter().map(String::as_str))?;
    }
    out.flush()
}

// ---------------------------------------------------------------------------
// CSV files
// ---------------------------------------------------------------------------

/// Writes the batch to `path` through a sibling temp file and a rename.
///
/// Returns the number of data rows written. On error the temp file is removed
/// and nothing appears under `path`.
pub fn write_csv_file_atomic(
    path: &Path,
    columns: &[String],
    batch: &Batch,
) -> Result<usize, StoreError> {
    let tmp_path = temp_path(path);
    if let Err(source) = write_then_rename(&tmp_path, path, columns, batch) {
        let _ = remove_file(&tmp_path);
        return Err(StoreError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(batch.len())
}

fn write_then_rename(
    tmp_path: &Path,
    path: &Path,
    columns: &[String],
    batch: &Batch,
) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(tmp_path)?;
    let mut writer = BufWriter::new(file);
    write_csv(&mut writer, columns, batch)?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    rename(tmp_path, path)
}

fn temp_path(path: &Path) -> PathBuf {
    let nonce = TEMP_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(format!(".{}-{nonce}.tmp", std::process::id()));
    PathBuf::from(tmp)
}
