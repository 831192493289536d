use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::broadcast::batch_progress::BatchProgressBroadcaster;

use super::status::PipelineItemStatus;

/// One item status transition, stamped by the controller.
///
/// `seq` increases by one per event within a run, so consumers can order
/// events across items; events of one item always arrive in transition order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub run_id: String,
    pub seq: u64,
    pub patient_id: String,
    pub previous: PipelineItemStatus,
    pub new: PipelineItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        run_id: &str,
        seq: u64,
        patient_id: &str,
        previous: PipelineItemStatus,
        new: PipelineItemStatus,
    ) -> Self {
        let error = new.reason().map(str::to_string);
        Self {
            run_id: run_id.to_string(),
            seq,
            patient_id: patient_id.to_string(),
            previous,
            new,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Consumer of progress events. Called from the controller only, never from workers.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests and callers that only want the final run.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes each event as a log line.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event.error {
            Some(ref error) => log::warn!(
                "[{}] {}: {} -> {} ({})",
                event.seq,
                event.patient_id,
                event.previous,
                event.new,
                error
            ),
            None => log::info!(
                "[{}] {}: {} -> {}",
                event.seq,
                event.patient_id,
                event.previous,
                event.new
            ),
        }
    }
}

/// Bridges progress events onto a broadcast channel for UI subscribers.
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl BroadcastProgress {
    pub fn new(broadcaster: &BatchProgressBroadcaster) -> Self {
        Self {
            sender: broadcaster.sender(),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }
}
