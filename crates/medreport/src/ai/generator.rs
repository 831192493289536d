//! Report generation contract and input preparation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::records::PatientRecord;
use crate::retry::RetryDecision;

/// Errors from one generation call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation timed out: {0}")]
    Timeout(String),

    #[error("Generation quota exceeded: {message}")]
    QuotaExceeded {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Invalid generation input: {0}")]
    InvalidInput(String),

    #[error("Generation service error: {0}")]
    ServiceError(String),

    /// The API key was refused. Not retried; the item fails.
    #[error("Generation service rejected the API key: {0}")]
    Unauthorized(String),
}

impl GenerationError {
    /// Stable short code used in item statuses and batch summaries.
    pub fn code(&self) -> &'static str {
        match self {
            GenerationError::Timeout(_) => "timeout",
            GenerationError::QuotaExceeded { .. } => "quota-exceeded",
            GenerationError::InvalidInput(_) => "invalid-input",
            GenerationError::ServiceError(_) => "service-error",
            GenerationError::Unauthorized(_) => "unauthorized",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            GenerationError::InvalidInput(_) | GenerationError::Unauthorized(_)
        )
    }

    /// Quota errors back off longer, honouring the service's hint when present.
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            GenerationError::Timeout(_) | GenerationError::ServiceError(_) => RetryDecision::Retry,
            GenerationError::QuotaExceeded {
                retry_after: Some(delay),
                ..
            } => RetryDecision::RetryAfter(*delay),
            GenerationError::QuotaExceeded { retry_after: None, .. } => RetryDecision::RetrySlow,
            GenerationError::InvalidInput(_) | GenerationError::Unauthorized(_) => {
                RetryDecision::Stop
            }
        }
    }
}

/// Clinical text normalized for the generation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientSummary {
    pub medical_history: String,
    pub symptoms: String,
}

impl PatientSummary {
    /// Collapses whitespace in history and symptoms. Fails with
    /// [`GenerationError::InvalidInput`] when both are empty or their combined
    /// length exceeds `max_chars`.
    pub fn build(record: &PatientRecord, max_chars: usize) -> Result<Self, GenerationError> {
        let medical_history = normalize_whitespace(&record.medical_history);
        let symptoms = normalize_whitespace(&record.symptoms);

        if medical_history.is_empty() && symptoms.is_empty() {
            return Err(GenerationError::InvalidInput(
                "medical history and symptoms are both empty".to_string(),
            ));
        }

        let len = medical_history.chars().count() + symptoms.chars().count();
        if len > max_chars {
            return Err(GenerationError::InvalidInput(format!(
                "clinical text is {} characters, limit is {}",
                len, max_chars
            )));
        }

        Ok(Self {
            medical_history,
            symptoms,
        })
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Everything the generator needs for one patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub patient_id: String,
    pub name: String,
    pub age: u32,
    pub summary: PatientSummary,
}

impl ReportRequest {
    pub fn new(record: &PatientRecord, summary: PatientSummary) -> Self {
        Self {
            patient_id: record.id.clone(),
            name: record.name.clone(),
            age: record.age,
            summary,
        }
    }

    /// Renders the generation prompt.
    pub fn prompt(&self) -> String {
        let or_none = |s: &str| {
            if s.is_empty() {
                "None reported".to_string()
            } else {
                s.to_string()
            }
        };
        format!(
            "As a medical AI assistant, analyze the following patient data and provide a \
             comprehensive health report:\n\n\
             Patient Information:\n\
             - Name: {name}\n\
             - Age: {age} years old\n\
             - Patient ID: {id}\n\
             - Medical History: {history}\n\
             - Current Symptoms: {symptoms}\n\n\
             Please provide:\n\
             1. A clear summary of the likely diagnosis\n\
             2. Potential health implications\n\
             3. General lifestyle recommendations\n\
             4. Follow-up care suggestions\n\
             5. Important precautions or warnings\n\n\
             Keep the report professional, informative, and easy to understand for the patient.\n\
             Write it as plain paragraphs separated by blank lines, without markdown.",
            name = self.name,
            age = self.age,
            id = self.patient_id,
            history = or_none(&self.summary.medical_history),
            symptoms = or_none(&self.summary.symptoms),
        )
    }
}

/// Produces report text for one patient. A call either returns a complete
/// report or fails; partial text is never returned.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, request: &ReportRequest) -> Result<String, GenerationError>;
}
