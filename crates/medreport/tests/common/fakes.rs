//! Scripted stand-ins for the AI service, the mail server and progress consumers.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::thread::ThreadId;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use medreport::ai::{GenerationError, ReportGenerator, ReportRequest};
use medreport::email::{DeliveryError, DeliveryReceipt, Mailer, OutgoingMessage};
use medreport::db::patient_repo::StatusCounts;
use medreport::pipeline::{CancelHandle, PipelineItemStatus, ProgressEvent, ProgressReporter};
use medreport::records::PatientRecord;
use medreport::store::{
    DeliveryLogEntry, DeliveryRecord, FailureRecord, InMemoryRecordStore, RecordStore, StoreError,
};

/// Returns scripted results per patient id, then a canned report.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, GenerationError>>>>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Queues results for one patient; later calls fall back to success.
    pub fn script(&self, patient_id: &str, results: Vec<Result<String, GenerationError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(patient_id.to_string(), results.into());
    }

    pub fn calls(&self, patient_id: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(patient_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ReportGenerator for ScriptedGenerator {
    async fn generate(&self, request: &ReportRequest) -> Result<String, GenerationError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.patient_id.clone())
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.patient_id)
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or_else(|| {
            Ok(format!(
                "Diagnosis summary for {}.\n\nKeep hydrated and schedule a follow-up visit.",
                request.name
            ))
        })
    }
}

/// Accepts messages unless a scripted error is queued for the recipient.
#[derive(Default)]
pub struct ScriptedMailer {
    scripts: Mutex<HashMap<String, VecDeque<DeliveryError>>>,
    always: Mutex<Option<DeliveryError>>,
    attempts: Mutex<HashMap<String, u32>>,
    delivered: Mutex<Vec<OutgoingMessage>>,
}

impl ScriptedMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues errors for one recipient; later sends succeed.
    pub fn script(&self, recipient: &str, errors: Vec<DeliveryError>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(recipient.to_string(), errors.into());
    }

    /// Every send fails with `error`.
    pub fn fail_always(&self, error: DeliveryError) {
        *self.always.lock().unwrap() = Some(error);
    }

    pub fn attempts(&self, recipient: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(recipient)
            .copied()
            .unwrap_or(0)
    }

    /// Messages accepted for `recipient`.
    pub fn delivered_to(&self, recipient: &str) -> usize {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == recipient)
            .count()
    }

    pub fn delivered(&self) -> Vec<OutgoingMessage> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for ScriptedMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(message.to.clone())
            .or_insert(0) += 1;

        if let Some(error) = self.always.lock().unwrap().clone() {
            return Err(error);
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&message.to)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        self.delivered.lock().unwrap().push(message.clone());
        Ok(DeliveryReceipt {
            message_id: format!("<{}@test.local>", uuid::Uuid::new_v4()),
            accepted_at: Utc::now(),
            response: "250 2.0.0 OK".to_string(),
        })
    }
}

/// Records every progress event; optionally cancels the run once a given
/// number of items have reached a status.
#[derive(Default)]
pub struct CollectingProgress {
    events: Mutex<Vec<ProgressEvent>>,
    cancel_on: Option<(PipelineItemStatus, usize, CancelHandle)>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_after(status: PipelineItemStatus, count: usize, cancel: CancelHandle) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            cancel_on: Some((status, count, cancel)),
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, patient_id: &str) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.patient_id == patient_id)
            .collect()
    }
}

impl ProgressReporter for CollectingProgress {
    fn report(&self, event: ProgressEvent) {
        let mut events = self.events.lock().unwrap();
        events.push(event);

        if let Some((ref status, count, ref cancel)) = self.cancel_on {
            let reached = events.iter().filter(|e| &e.new == status).count();
            if reached >= count {
                cancel.cancel();
            }
        }
    }
}

/// In-memory store that remembers which threads issued lookups and writes.
pub struct ThreadRecordingStore {
    inner: InMemoryRecordStore,
    threads: Mutex<Vec<ThreadId>>,
}

impl ThreadRecordingStore {
    pub fn new(records: Vec<PatientRecord>) -> Self {
        Self {
            inner: InMemoryRecordStore::with_records(records),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().clone()
    }

    fn note(&self) {
        self.threads.lock().unwrap().push(std::thread::current().id());
    }
}

impl RecordStore for ThreadRecordingStore {
    fn upsert(&self, record: &PatientRecord) -> Result<(), StoreError> {
        self.inner.upsert(record)
    }

    fn get(&self, id: &str) -> Result<Option<PatientRecord>, StoreError> {
        self.note();
        self.inner.get(id)
    }

    fn list(&self) -> Result<Vec<PatientRecord>, StoreError> {
        self.inner.list()
    }

    fn search(&self, term: &str) -> Result<Vec<PatientRecord>, StoreError> {
        self.inner.search(term)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id)
    }

    fn list_pending(&self) -> Result<Vec<PatientRecord>, StoreError> {
        self.inner.list_pending()
    }

    fn record_delivery(&self, delivery: &DeliveryRecord) -> Result<(), StoreError> {
        self.note();
        self.inner.record_delivery(delivery)
    }

    fn record_failure(&self, failure: &FailureRecord) -> Result<(), StoreError> {
        self.note();
        self.inner.record_failure(failure)
    }

    fn history(&self, patient_id: &str) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        self.inner.history(patient_id)
    }

    fn stats(&self) -> Result<StatusCounts, StoreError> {
        self.inner.stats()
    }
}
