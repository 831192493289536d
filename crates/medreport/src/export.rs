//! Full dumps of the record store as CSV or JSON.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::records::PatientRecord;
use crate::store::{RecordStore, StoreError};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode export: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// Picks the format from a `.csv` or `.json` extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

const CSV_HEADER: [&str; 11] = [
    "patient_id",
    "name",
    "age",
    "email",
    "medical_history",
    "symptoms",
    "created_at",
    "report_status",
    "last_sent_at",
    "last_message_id",
    "last_error",
];

/// File name for an export taken at `now`, e.g. `patients_export_20260501_081500.csv`.
pub fn default_file_name(format: ExportFormat, now: DateTime<Utc>) -> String {
    format!(
        "patients_export_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Writes every record in the store, oldest first. Returns the record count.
pub fn export_records<W: Write>(
    store: &dyn RecordStore,
    format: ExportFormat,
    mut out: W,
) -> Result<usize, ExportError> {
    let records = store.list()?;
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &records)?;
            out.write_all(b"\n")?;
        }
        ExportFormat::Csv => write_csv(&records, &mut out)?,
    }
    out.flush()?;
    log::info!("Exported {} patient records as {:?}", records.len(), format);
    Ok(records.len())
}

fn write_csv<W: Write>(records: &[PatientRecord], out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{}", CSV_HEADER.join(","))?;
    for record in records {
        let fields = [
            record.id.clone(),
            record.name.clone(),
            record.age.to_string(),
            record.email.clone(),
            record.medical_history.clone(),
            record.symptoms.clone(),
            record.created_at.to_rfc3339(),
            record.report_status.as_str().to_string(),
            record.last_sent_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            record.last_message_id.clone().unwrap_or_default(),
            record.last_error.clone().unwrap_or_default(),
        ];
        let line: Vec<String> = fields.iter().map(String::as_str).map(csv_field).collect();
        writeln!(out, "{}", line.join(","))?;
    }
    Ok(())
}

/// Quotes a field when it holds a delimiter, a quote or a line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
