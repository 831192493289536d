use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::warn;
use tokio::sync::mpsc::UnboundedSender;

use crate::worker::job::WorkerMessage;

use super::error::RunWarning;
use super::status::PipelineItemStatus;

/// Output of one successful generation. The PDF is attached once rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub patient_id: String,
    pub report_text: String,
    pub generated_at: DateTime<Utc>,
    pub pdf: Option<Vec<u8>>,
}

impl ReportArtifact {
    pub fn new(patient_id: &str, report_text: String, generated_at: DateTime<Utc>) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            report_text,
            generated_at,
            pdf: None,
        }
    }

    pub fn with_pdf(mut self, pdf: Vec<u8>) -> Self {
        self.pdf = Some(pdf);
        self
    }
}

/// Cooperative cancellation for a batch run. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. In-flight stages complete; no new stage or item starts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Checked by workers before an item and between stages: user cancellation
/// plus the controller's halt flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    cancel: CancelHandle,
    halt: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new(cancel: CancelHandle) -> Self {
        Self {
            cancel,
            halt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.is_halted()
    }
}

/// Tracks one item's status inside a worker and forwards every transition to
/// the controller.
pub struct ItemTracker {
    patient_id: String,
    status: PipelineItemStatus,
    messages: Option<UnboundedSender<WorkerMessage>>,
}

impl ItemTracker {
    pub fn new(patient_id: &str, messages: UnboundedSender<WorkerMessage>) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            status: PipelineItemStatus::Pending,
            messages: Some(messages),
        }
    }

    /// A tracker that reports nowhere, for previews.
    pub fn detached(patient_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            status: PipelineItemStatus::Pending,
            messages: None,
        }
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn status(&self) -> &PipelineItemStatus {
        &self.status
    }

    /// Moves to `next` if the transition is legal. Illegal transitions are
    /// logged and dropped.
    pub fn advance(&mut self, next: PipelineItemStatus) -> bool {
        if !self.status.can_transition_to(&next) {
            warn!(
                "Ignoring illegal transition for {}: {} -> {}",
                self.patient_id, self.status, next
            );
            return false;
        }

        self.status = next.clone();
        if let Some(ref messages) = self.messages {
            let message = WorkerMessage::Transition {
                patient_id: self.patient_id.clone(),
                status: next,
            };
            if messages.send(message).is_err() {
                warn!(
                    "Controller stopped listening; transition for {} not delivered",
                    self.patient_id
                );
            }
        }
        true
    }

    /// Forwards a non-fatal problem to the controller.
    pub fn warn(&self, warning: RunWarning) {
        if let Some(ref messages) = self.messages {
            let _ = messages.send(WorkerMessage::Warning(warning));
        }
    }
}
