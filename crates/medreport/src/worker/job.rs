use chrono::{DateTime, Utc};

use crate::pipeline::{ItemOutcome, PipelineItemStatus, RunWarning};
use crate::records::PatientRecord;

/// One queued item: an owned snapshot of the patient record.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub patient: PatientRecord,
    pub queued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(patient: PatientRecord) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient,
            queued_at: Utc::now(),
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient.id
    }
}

/// Sent by workers to the controller, the single consumer of this queue.
#[derive(Debug)]
pub enum WorkerMessage {
    Transition {
        patient_id: String,
        status: PipelineItemStatus,
    },
    Warning(RunWarning),
    Finished {
        patient_id: String,
        outcome: ItemOutcome,
    },
}
