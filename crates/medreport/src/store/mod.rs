//! Record store: where patient records live and where delivery outcomes are written back.
//!
//! The pipeline only needs CRUD semantics, so the store is a small synchronous
//! trait with a SQLite implementation and an in-memory one. Calls may block on
//! disk or on another process's write lock; the batch controller issues them
//! from `spawn_blocking`.

mod memory;
mod sqlite;

pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::patient_repo::StatusCounts;
use crate::db::DatabaseError;
use crate::records::PatientRecord;

pub use crate::db::delivery_repo::DeliveryLogEntry;

/// Errors from record store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Patient not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Record store lock poisoned")]
    LockPoisoned,
}

/// A confirmed delivery to write back.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub run_id: String,
    pub patient_id: String,
    pub sent_at: DateTime<Utc>,
    pub message_id: String,
}

/// A terminal item failure to write back.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub run_id: String,
    pub patient_id: String,
    pub stage: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Persistence for patient records and their delivery status.
pub trait RecordStore: Send + Sync {
    /// Inserts a record or updates the demographic and clinical fields of an existing one.
    fn upsert(&self, record: &PatientRecord) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<PatientRecord>, StoreError>;

    /// All records, oldest first.
    fn list(&self) -> Result<Vec<PatientRecord>, StoreError>;

    /// Case-insensitive match on id or name.
    fn search(&self, term: &str) -> Result<Vec<PatientRecord>, StoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Records whose report has not been sent yet, oldest first.
    fn list_pending(&self) -> Result<Vec<PatientRecord>, StoreError>;

    fn record_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError>;

    fn record_failure(&self, failure: &FailureRecord) -> Result<(), StoreError>;

    fn history(&self, patient_id: &str) -> Result<Vec<DeliveryLogEntry>, StoreError>;

    fn stats(&self) -> Result<StatusCounts, StoreError>;
}
