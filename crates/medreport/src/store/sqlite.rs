use super::{DeliveryLogEntry, DeliveryRecord, FailureRecord, RecordStore, StoreError};
use crate::db::patient_repo::{self, StatusCounts};
use crate::db::{delivery_repo, Database, DatabaseError};
use crate::records::{PatientRecord, ReportStatus};

/// [`RecordStore`] backed by the SQLite [`Database`].
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Busy means another process holds the write lock; the pipeline reports
/// that as an unavailable store rather than a database fault.
fn store_error(e: DatabaseError) -> StoreError {
    if e.is_busy() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Database(e)
    }
}

impl RecordStore for SqliteRecordStore {
    fn upsert(&self, record: &PatientRecord) -> Result<(), StoreError> {
        patient_repo::upsert(&self.db, record).map_err(store_error)
    }

    fn get(&self, id: &str) -> Result<Option<PatientRecord>, StoreError> {
        patient_repo::find_by_id(&self.db, id).map_err(store_error)
    }

    fn list(&self) -> Result<Vec<PatientRecord>, StoreError> {
        patient_repo::list(&self.db, None).map_err(store_error)
    }

    fn search(&self, term: &str) -> Result<Vec<PatientRecord>, StoreError> {
        patient_repo::search(&self.db, term).map_err(store_error)
    }

    /// Also drops the patient's delivery log (cascading foreign key).
    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        patient_repo::delete(&self.db, id).map_err(store_error)
    }

    fn list_pending(&self) -> Result<Vec<PatientRecord>, StoreError> {
        patient_repo::list(&self.db, Some(ReportStatus::Pending)).map_err(store_error)
    }

    fn record_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError> {
        let entry = DeliveryLogEntry {
            run_id: delivery.run_id.clone(),
            patient_id: delivery.patient_id.clone(),
            outcome: ReportStatus::Sent.as_str().to_string(),
            stage: None,
            detail: Some(delivery.message_id.clone()),
            recorded_at: delivery.sent_at,
        };
        let found = self
            .db
            .transaction(|tx| {
                if !patient_repo::mark_sent(
                    tx,
                    &delivery.patient_id,
                    delivery.sent_at,
                    &delivery.message_id,
                )? {
                    return Ok(false);
                }
                delivery_repo::insert(tx, &entry)?;
                Ok(true)
            })
            .map_err(store_error)?;
        if !found {
            return Err(StoreError::NotFound(delivery.patient_id.clone()));
        }
        Ok(())
    }

    fn record_failure(&self, failure: &FailureRecord) -> Result<(), StoreError> {
        let entry = DeliveryLogEntry {
            run_id: failure.run_id.clone(),
            patient_id: failure.patient_id.clone(),
            outcome: ReportStatus::Failed.as_str().to_string(),
            stage: Some(failure.stage.clone()),
            detail: Some(failure.reason.clone()),
            recorded_at: failure.failed_at,
        };
        let found = self
            .db
            .transaction(|tx| {
                if !patient_repo::mark_failed(tx, &failure.patient_id, &failure.reason)? {
                    return Ok(false);
                }
                delivery_repo::insert(tx, &entry)?;
                Ok(true)
            })
            .map_err(store_error)?;
        if !found {
            return Err(StoreError::NotFound(failure.patient_id.clone()));
        }
        Ok(())
    }

    fn history(&self, patient_id: &str) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        delivery_repo::history(&self.db, patient_id).map_err(store_error)
    }

    fn stats(&self) -> Result<StatusCounts, StoreError> {
        patient_repo::count_by_status(&self.db).map_err(store_error)
    }
}
