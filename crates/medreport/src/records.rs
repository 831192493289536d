//! Patient records as the pipeline sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::email::address::is_valid_email;

/// Delivery state of a patient's most recent report, as persisted by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Sent,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Sent => "sent",
            ReportStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ReportStatus::Pending),
            "sent" => Some(ReportStatus::Sent),
            "failed" => Some(ReportStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One patient, owned by the record store. The pipeline works on a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    /// External patient identifier (unique).
    pub id: String,
    pub name: String,
    pub age: u32,
    pub email: String,
    pub medical_history: String,
    pub symptoms: String,
    pub created_at: DateTime<Utc>,
    pub report_status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
}

impl PatientRecord {
    /// Creates a pending record with the current timestamp.
    pub fn new(
        id: &str,
        name: &str,
        age: u32,
        email: &str,
        medical_history: &str,
        symptoms: &str,
    ) -> Self {
        Self {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            age,
            email: email.trim().to_lowercase(),
            medical_history: medical_history.trim().to_string(),
            symptoms: symptoms.trim().to_string(),
            created_at: Utc::now(),
            report_status: ReportStatus::Pending,
            last_error: None,
            last_sent_at: None,
            last_message_id: None,
        }
    }
}

/// Errors raised while validating imported records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("Row {row}: missing required field '{field}'")]
    MissingField { row: usize, field: &'static str },

    #[error("Row {row}: invalid email address")]
    InvalidEmail { row: usize },

    #[error("Row {row}: age {age} is out of range")]
    InvalidAge { row: usize, age: u32 },

    #[error("Row {row}: duplicate patient id '{id}'")]
    DuplicateId { row: usize, id: String },
}

/// One row of an import file, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientImport {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub email: String,
    #[serde(default)]
    pub medical_history: String,
    #[serde(default)]
    pub symptoms: String,
}

/// Highest accepted age; anything above is treated as a data-entry error.
const MAX_AGE: u32 = 150;

/// Validates import rows, returning the accepted records and one error per rejected row.
/// Row numbers are 1-based.
pub fn validate_import(rows: Vec<PatientImport>) -> (Vec<PatientRecord>, Vec<ImportError>) {
    let mut accepted = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (index, row) in rows.into_iter().enumerate() {
        let row_no = index + 1;
        match validate_row(row_no, &row) {
            Ok(()) => {
                let record = PatientRecord::new(
                    &row.id,
                    &row.name,
                    row.age,
                    &row.email,
                    &row.medical_history,
                    &row.symptoms,
                );
                if !seen.insert(record.id.clone()) {
                    errors.push(ImportError::DuplicateId {
                        row: row_no,
                        id: record.id,
                    });
                    continue;
                }
                accepted.push(record);
            }
            Err(e) => errors.push(e),
        }
    }

    (accepted, errors)
}

fn validate_row(row: usize, input: &PatientImport) -> Result<(), ImportError> {
    if input.id.trim().is_empty() {
        return Err(ImportError::MissingField { row, field: "id" });
    }
    if input.name.trim().is_empty() {
        return Err(ImportError::MissingField { row, field: "name" });
    }
    if input.email.trim().is_empty() {
        return Err(ImportError::MissingField { row, field: "email" });
    }
    if !is_valid_email(input.email.trim()) {
        return Err(ImportError::InvalidEmail { row });
    }
    if input.age > MAX_AGE {
        return Err(ImportError::InvalidAge {
            row,
            age: input.age,
        });
    }
    Ok(())
}
