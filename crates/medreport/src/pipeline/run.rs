use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::error::RunWarning;
use super::status::PipelineItemStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Patient '{0}' is not part of this run")]
    UnknownPatient(String),

    #[error("Illegal transition for '{patient_id}': {from} -> {to}")]
    Illegal {
        patient_id: String,
        from: PipelineItemStatus,
        to: PipelineItemStatus,
    },
}

/// Run-scoped state, owned and mutated by the batch controller only.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub run_id: String,
    /// Submitted ids, in submission order, without duplicates.
    pub patient_ids: Vec<String>,
    statuses: HashMap<String, PipelineItemStatus>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: usize,
    pub failed: usize,
    /// Items still non-terminal when the run finished.
    pub skipped: usize,
    pub cancelled: bool,
    pub halted: bool,
    pub warnings: Vec<RunWarning>,
}

impl BatchRun {
    pub fn new(run_id: &str, patient_ids: Vec<String>) -> Self {
        let statuses = patient_ids
            .iter()
            .map(|id| (id.clone(), PipelineItemStatus::Pending))
            .collect();
        Self {
            run_id: run_id.to_string(),
            patient_ids,
            statuses,
            started_at: Utc::now(),
            finished_at: None,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
            halted: false,
            warnings: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.patient_ids.len()
    }

    pub fn status(&self, patient_id: &str) -> Option<&PipelineItemStatus> {
        self.statuses.get(patient_id)
    }

    /// Items with their statuses, in submission order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &PipelineItemStatus)> {
        self.patient_ids
            .iter()
            .filter_map(|id| self.statuses.get(id).map(|s| (id.as_str(), s)))
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Applies one transition and returns the previous status.
    pub fn apply(
        &mut self,
        patient_id: &str,
        next: PipelineItemStatus,
    ) -> Result<PipelineItemStatus, TransitionError> {
        let current = self
            .statuses
            .get_mut(patient_id)
            .ok_or_else(|| TransitionError::UnknownPatient(patient_id.to_string()))?;

        if !current.can_transition_to(&next) {
            return Err(TransitionError::Illegal {
                patient_id: patient_id.to_string(),
                from: current.clone(),
                to: next,
            });
        }

        match next {
            PipelineItemStatus::Sent => self.succeeded += 1,
            PipelineItemStatus::Failed { .. } => self.failed += 1,
            _ => {}
        }

        Ok(std::mem::replace(current, next))
    }

    /// Seals the run. Every item that is not terminal counts as skipped.
    pub fn finish(&mut self, cancelled: bool, halted: bool) {
        self.skipped = self
            .statuses
            .values()
            .filter(|status| !status.is_terminal())
            .count();
        self.cancelled = cancelled;
        self.halted = halted;
        self.finished_at = Some(Utc::now());
    }

    pub fn summary(&self) -> BatchSummary {
        let mut failed_by_stage = BTreeMap::new();
        let mut failures = Vec::new();

        for (patient_id, status) in self.items() {
            if let PipelineItemStatus::Failed {
                stage,
                code,
                reason,
            } = status
            {
                *failed_by_stage.entry(stage.as_str().to_string()).or_insert(0) += 1;
                failures.push(FailedItem {
                    patient_id: patient_id.to_string(),
                    stage: stage.as_str().to_string(),
                    code: code.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let finished_at = self.finished_at.unwrap_or_else(Utc::now);
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;

        BatchSummary {
            run_id: self.run_id.clone(),
            total: self.total(),
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            failed_by_stage,
            failures,
            cancelled: self.cancelled,
            halted: self.halted,
            warnings: self.warnings.len(),
            started_at: self.started_at,
            finished_at,
            duration_ms,
        }
    }
}

/// One failed item in a [`BatchSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub patient_id: String,
    pub stage: String,
    pub code: String,
    pub reason: String,
}

/// Reconciled outcome of a run, for display or export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub run_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failed_by_stage: BTreeMap<String, usize>,
    pub failures: Vec<FailedItem>,
    pub cancelled: bool,
    pub halted: bool,
    pub warnings: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} total, {} sent, {} failed, {} skipped",
            self.total, self.succeeded, self.failed, self.skipped
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        if self.halted {
            write!(f, " (halted)")?;
        }
        for failure in &self.failures {
            write!(
                f,
                "\n  {} [{}/{}]: {}",
                failure.patient_id, failure.stage, failure.code, failure.reason
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::status::Stage;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn drive_to_sent(run: &mut BatchRun, id: &str) {
        let mut status = PipelineItemStatus::Pending;
        while let Some(next) = status.next() {
            run.apply(id, next.clone()).unwrap();
            status = next;
        }
    }

    #[test]
    fn test_apply_returns_previous_status() {
        let mut run = BatchRun::new("run-1", ids(&["P-1"]));
        let previous = run.apply("P-1", PipelineItemStatus::Generating).unwrap();
        assert_eq!(previous, PipelineItemStatus::Pending);
        assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Generating));
    }

    #[test]
    fn test_apply_rejects_unknown_and_illegal() {
        let mut run = BatchRun::new("run-1", ids(&["P-1"]));
        assert!(matches!(
            run.apply("P-9", PipelineItemStatus::Generating),
            Err(TransitionError::UnknownPatient(_))
        ));
        assert!(matches!(
            run.apply("P-1", PipelineItemStatus::Sending),
            Err(TransitionError::Illegal { .. })
        ));
        assert_eq!(run.status("P-1"), Some(&PipelineItemStatus::Pending));
    }

    #[test]
    fn test_counts_add_up_to_total() {
        let mut run = BatchRun::new("run-1", ids(&["P-1", "P-2", "P-3", "P-4"]));
        drive_to_sent(&mut run, "P-1");
        run.apply("P-2", PipelineItemStatus::Generating).unwrap();
        run.apply(
            "P-2",
            PipelineItemStatus::failed(Stage::Generate, "invalid-input", "empty history"),
        )
        .unwrap();
        run.apply("P-3", PipelineItemStatus::Generating).unwrap();
        assert!(!run.is_finished());
        run.finish(true, false);
        assert!(run.is_finished());

        assert_eq!(run.succeeded, 1);
        assert_eq!(run.failed, 1);
        assert_eq!(run.skipped, 2);
        assert_eq!(run.succeeded + run.failed + run.skipped, run.total());
        assert!(run.cancelled);
    }

    #[test]
    fn test_terminal_items_do_not_change() {
        let mut run = BatchRun::new("run-1", ids(&["P-1"]));
        drive_to_sent(&mut run, "P-1");
        assert!(run
            .apply(
                "P-1",
                PipelineItemStatus::failed(Stage::Send, "transient", "late")
            )
            .is_err());
        assert_eq!(run.succeeded, 1);
        assert_eq!(run.failed, 0);
    }

    #[test]
    fn test_summary_groups_failures_by_stage() {
        let mut run = BatchRun::new("run-1", ids(&["P-1", "P-2", "P-3"]));
        run.apply(
            "P-1",
            PipelineItemStatus::failed(Stage::Validate, "not-found", "missing"),
        )
        .unwrap();
        run.apply("P-2", PipelineItemStatus::Generating).unwrap();
        run.apply(
            "P-2",
            PipelineItemStatus::failed(Stage::Generate, "timeout", "slow"),
        )
        .unwrap();
        drive_to_sent(&mut run, "P-3");
        run.finish(false, false);

        let summary = run.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failed_by_stage.get("validate"), Some(&1));
        assert_eq!(summary.failed_by_stage.get("generate"), Some(&1));
        assert_eq!(summary.failures[0].patient_id, "P-1");
        assert_eq!(summary.failures[1].code, "timeout");

        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["failedByStage"]["generate"], 1);
        assert_eq!(json["failures"][0]["reason"], "missing");
    }
}
