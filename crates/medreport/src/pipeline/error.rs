use serde::Serialize;
use thiserror::Error;

use crate::ai::GenerationError;
use crate::email::DeliveryError;
use crate::render::RenderError;
use crate::retry::RetryError;
use crate::store::StoreError;

use super::run::BatchRun;
use super::status::Stage;

/// Why one item failed. Caught at the item boundary and recorded on the item's
/// status; never affects sibling items.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemError {
    #[error("{reason}")]
    Validation { code: &'static str, reason: String },

    #[error("{error}")]
    Generation { error: GenerationError, attempts: u32 },

    #[error("{0}")]
    Render(#[from] RenderError),

    #[error("{error}")]
    Delivery { error: DeliveryError, attempts: u32 },
}

impl ItemError {
    pub fn invalid_email() -> Self {
        ItemError::Validation {
            code: "invalid-email",
            reason: "Recipient email address is not valid".to_string(),
        }
    }

    pub fn not_found(patient_id: &str) -> Self {
        ItemError::Validation {
            code: "not-found",
            reason: format!("Patient '{}' not found in record store", patient_id),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ItemError::Validation { .. } => Stage::Validate,
            ItemError::Generation { .. } => Stage::Generate,
            ItemError::Render(_) => Stage::Render,
            ItemError::Delivery { .. } => Stage::Send,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ItemError::Validation { code, .. } => code,
            ItemError::Generation { error, .. } => error.code(),
            ItemError::Render(error) => error.code(),
            ItemError::Delivery { error, .. } => error.code(),
        }
    }

    /// Number of external calls made before giving up (0 when the stage never called out).
    pub fn attempts(&self) -> u32 {
        match self {
            ItemError::Generation { attempts, .. } | ItemError::Delivery { attempts, .. } => {
                *attempts
            }
            ItemError::Validation { .. } | ItemError::Render(_) => 0,
        }
    }
}

impl From<RetryError<GenerationError>> for ItemError {
    fn from(err: RetryError<GenerationError>) -> Self {
        let attempts = err.attempts();
        ItemError::Generation {
            error: err.into_inner(),
            attempts,
        }
    }
}

impl From<RetryError<DeliveryError>> for ItemError {
    fn from(err: RetryError<DeliveryError>) -> Self {
        let attempts = err.attempts();
        ItemError::Delivery {
            error: err.into_inner(),
            attempts,
        }
    }
}

/// Errors that end `run_batch` without a normal result.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("No patient ids were submitted")]
    EmptyBatch,

    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),

    #[error("None of the {requested} submitted patient ids exist in the record store")]
    NoResolvablePatients { requested: usize },

    #[error("Record store failed while resolving patients: {0}")]
    Store(#[from] StoreError),

    /// Mail credentials were rejected. Carries the partial run; items that had
    /// not been sent keep their non-terminal status.
    #[error("Mail server rejected the sender credentials: {message}")]
    DeliveryAuth { message: String, run: Box<BatchRun> },
}

impl BatchError {
    /// The partial run, for errors raised after the run started.
    pub fn run(&self) -> Option<&BatchRun> {
        match self {
            BatchError::DeliveryAuth { run, .. } => Some(run),
            _ => None,
        }
    }
}

/// Non-fatal problems recorded on the run. They never change an item's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    StoreWriteFailed { patient_id: String, error: String },
    ArchiveFailed { patient_id: String, error: String },
}
