use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{DeliveryLogEntry, DeliveryRecord, FailureRecord, RecordStore, StoreError};
use crate::db::patient_repo::StatusCounts;
use crate::records::{PatientRecord, ReportStatus};

#[derive(Default)]
struct Inner {
    patients: HashMap<String, PatientRecord>,
    log: Vec<DeliveryLogEntry>,
}

/// Volatile [`RecordStore`] for previews, dry runs and tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given records.
    pub fn with_records(records: impl IntoIterator<Item = PatientRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            for record in records {
                inner.patients.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Makes every subsequent delivery/failure write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

fn sorted(mut records: Vec<PatientRecord>) -> Vec<PatientRecord> {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    records
}

impl RecordStore for InMemoryRecordStore {
    fn upsert(&self, record: &PatientRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.patients.get_mut(&record.id) {
            Some(existing) => {
                existing.name = record.name.clone();
                existing.age = record.age;
                existing.email = record.email.clone();
                existing.medical_history = record.medical_history.clone();
                existing.symptoms = record.symptoms.clone();
            }
            None => {
                inner.patients.insert(record.id.clone(), record.clone());
            }
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<PatientRecord>, StoreError> {
        Ok(self.lock()?.patients.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<PatientRecord>, StoreError> {
        Ok(sorted(self.lock()?.patients.values().cloned().collect()))
    }

    fn search(&self, term: &str) -> Result<Vec<PatientRecord>, StoreError> {
        let needle = term.trim().to_lowercase();
        let mut found: Vec<PatientRecord> = self
            .lock()?
            .patients
            .values()
            .filter(|p| {
                p.id.to_lowercase().contains(&needle) || p.name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        if inner.patients.remove(id).is_none() {
            return Ok(false);
        }
        inner.log.retain(|e| e.patient_id != id);
        Ok(true)
    }

    fn list_pending(&self) -> Result<Vec<PatientRecord>, StoreError> {
        Ok(sorted(
            self.lock()?
                .patients
                .values()
                .filter(|p| p.report_status == ReportStatus::Pending)
                .cloned()
                .collect(),
        ))
    }

    fn record_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        let patient = inner
            .patients
            .get_mut(&delivery.patient_id)
            .ok_or_else(|| StoreError::NotFound(delivery.patient_id.clone()))?;
        patient.report_status = ReportStatus::Sent;
        patient.last_sent_at = Some(delivery.sent_at);
        patient.last_message_id = Some(delivery.message_id.clone());
        patient.last_error = None;
        inner.log.push(DeliveryLogEntry {
            run_id: delivery.run_id.clone(),
            patient_id: delivery.patient_id.clone(),
            outcome: ReportStatus::Sent.as_str().to_string(),
            stage: None,
            detail: Some(delivery.message_id.clone()),
            recorded_at: delivery.sent_at,
        });
        Ok(())
    }

    fn record_failure(&self, failure: &FailureRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut inner = self.lock()?;
        let patient = inner
            .patients
            .get_mut(&failure.patient_id)
            .ok_or_else(|| StoreError::NotFound(failure.patient_id.clone()))?;
        patient.report_status = ReportStatus::Failed;
        patient.last_error = Some(failure.reason.clone());
        inner.log.push(DeliveryLogEntry {
            run_id: failure.run_id.clone(),
            patient_id: failure.patient_id.clone(),
            outcome: ReportStatus::Failed.as_str().to_string(),
            stage: Some(failure.stage.clone()),
            detail: Some(failure.reason.clone()),
            recorded_at: failure.failed_at,
        });
        Ok(())
    }

    fn history(&self, patient_id: &str) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        Ok(self
            .lock()?
            .log
            .iter()
            .filter(|e| e.patient_id == patient_id)
            .cloned()
            .collect())
    }

    fn stats(&self) -> Result<StatusCounts, StoreError> {
        let inner = self.lock()?;
        let mut counts = StatusCounts::default();
        for patient in inner.patients.values() {
            counts.total += 1;
            match patient.report_status {
                ReportStatus::Pending => counts.pending += 1,
                ReportStatus::Sent => counts.sent += 1,
                ReportStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
