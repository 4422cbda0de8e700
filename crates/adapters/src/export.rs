use std::fs;
use std::path::Path;

use lens_core::stream_session::SessionSnapshot;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write CSV export: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes the snapshot's rows and returns how many were written.
pub fn export_snapshot(
    path: &Path,
    snapshot: &SessionSnapshot,
    format: ExportFormat,
) -> Result<usize, ExportError> {
    match format {
        ExportFormat::Csv => export_rows_to_csv(path, &snapshot.columns, &snapshot.rows),
        ExportFormat::Json => export_rows_to_json(path, &snapshot.columns, &snapshot.rows),
    }
}

pub fn export_rows_to_csv(
    path: &Path,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<usize, ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        let padded = (0..headers.len()).map(|index| row.get(index).map_or("", String::as_str));
        writer.write_record(padded)?;
    }
    writer.flush().map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(rows.len())
}

/// Writes one JSON array of objects keyed by column name.
pub fn export_rows_to_json(
    path: &Path,
    headers: &[String],
    rows: &[Vec<String>],
) -> Result<usize, ExportError> {
    let records = rows
        .iter()
        .map(|row| {
            let object = headers
                .iter()
                .enumerate()
                .map(|(index, header)| {
                    let value = row
                        .get(index)
                        .map_or(Value::Null, |value| Value::String(value.clone()));
                    (header.clone(), value)
                })
                .collect::<Map<_, _>>();
            Value::Object(object)
        })
        .collect::<Vec<_>>();

    let payload = serde_json::to_string_pretty(&records)?;
    fs::write(path, payload).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(rows.len())
}
