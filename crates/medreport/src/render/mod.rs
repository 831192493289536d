//! Report document rendering.

pub mod pdf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::records::PatientRecord;

pub use pdf::PdfRenderer;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Failed to write PDF: {0}")]
    Pdf(String),
}

impl RenderError {
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::MissingField(_) => "missing-field",
            RenderError::Pdf(_) => "pdf",
        }
    }
}

/// Identity fields and report text for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub patient_id: String,
    pub name: String,
    pub age: u32,
    pub email: String,
    pub report_text: String,
    pub generated_at: DateTime<Utc>,
}

impl RenderRequest {
    pub fn new(record: &PatientRecord, report_text: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            patient_id: record.id.clone(),
            name: record.name.clone(),
            age: record.age,
            email: record.email.clone(),
            report_text: report_text.to_string(),
            generated_at,
        }
    }
}

/// Turns report text and patient identity into document bytes. Output depends
/// only on the request, including its timestamp.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError>;
}
