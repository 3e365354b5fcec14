//! Shared row-to-domain conversion helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use vconv_core::{ConversionOptions, Job, JobStatus, StorageError};

/// Canonical storage form for timestamps.
///
/// Fixed-precision RFC 3339 UTC so string comparison in SQL matches
/// chronological order.
pub(crate) fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub(crate) fn parse_db_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Storage(format!("invalid timestamp '{s}': {e}")))
}

pub(crate) fn map_column_error(e: sqlx::Error) -> StorageError {
    StorageError::Storage(format!("column read error: {e}"))
}

/// Convert a database row to a [`Job`].
pub(crate) fn row_to_job(row: &SqliteRow) -> Result<Job, StorageError> {
    let id: String = row.try_get("id").map_err(map_column_error)?;
    let name: String = row.try_get("name").map_err(map_column_error)?;
    let input_path: String = row.try_get("input_path").map_err(map_column_error)?;
    let output_path: String = row.try_get("output_path").map_err(map_column_error)?;
    let input_bytes: i64 = row.try_get("input_bytes").map_err(map_column_error)?;
    let output_bytes: i64 = row.try_get("output_bytes").map_err(map_column_error)?;
    let preset_name: String = row.try_get("preset_name").map_err(map_column_error)?;
    let overrides_json: String = row.try_get("overrides").map_err(map_column_error)?;
    let status_str: String = row.try_get("status").map_err(map_column_error)?;
    let progress: i64 = row.try_get("progress").map_err(map_column_error)?;
    let duration_sec: Option<f64> = row.try_get("duration_sec").map_err(map_column_error)?;
    let current_sec: Option<f64> = row.try_get("current_sec").map_err(map_column_error)?;
    let speed: Option<f64> = row.try_get("speed").map_err(map_column_error)?;
    let eta_sec: Option<f64> = row.try_get("eta_sec").map_err(map_column_error)?;
    let error_message: Option<String> = row.try_get("error_message").map_err(map_column_error)?;
    let created_at: String = row.try_get("created_at").map_err(map_column_error)?;
    let started_at: Option<String> = row.try_get("started_at").map_err(map_column_error)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(map_column_error)?;

    let overrides: ConversionOptions = serde_json::from_str(&overrides_json).unwrap_or_else(|e| {
        tracing::warn!(job_id = %id, error = %e, "unreadable overrides JSON, using defaults");
        ConversionOptions::default()
    });

    Ok(Job {
        id,
        name,
        input_path: input_path.into(),
        output_path: output_path.into(),
        input_bytes: input_bytes.max(0) as u64,
        output_bytes: output_bytes.max(0) as u64,
        preset_name,
        overrides,
        status: JobStatus::parse(&status_str),
        progress: progress.clamp(0, 100) as u8,
        duration_sec,
        current_sec,
        speed,
        eta_sec,
        error: error_message,
        created_at: parse_db_time(&created_at)?,
        started_at: started_at.as_deref().map(parse_db_time).transpose()?,
        completed_at: completed_at.as_deref().map(parse_db_time).transpose()?,
    })
}
