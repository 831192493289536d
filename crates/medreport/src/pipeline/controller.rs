use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::email::DeliveryError;
use crate::records::PatientRecord;
use crate::store::{DeliveryRecord, FailureRecord, RecordStore, StoreError};
use crate::worker::{Job, WorkerMessage, WorkerPool};

use super::config::BatchConfig;
use super::context::{CancelHandle, StopSignal};
use super::error::{BatchError, ItemError, RunWarning};
use super::progress::{ProgressEvent, ProgressReporter};
use super::run::BatchRun;
use super::runner::{ItemOutcome, Pipeline};
use super::status::PipelineItemStatus;

/// Owns a batch run: resolves patients, feeds the worker pool, applies every
/// status transition, writes outcomes back to the record store and emits
/// progress events.
pub struct BatchController {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn RecordStore>,
    config: BatchConfig,
}

impl BatchController {
    pub fn new(pipeline: Arc<Pipeline>, store: Arc<dyn RecordStore>, config: BatchConfig) -> Self {
        Self {
            pipeline,
            store,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Runs generate → render → send for every submitted patient.
    ///
    /// Item failures are recorded on the returned run. Only precondition
    /// violations and rejected mail credentials surface as `Err`.
    pub async fn run_batch(
        &self,
        patient_ids: &[String],
        progress: &dyn ProgressReporter,
        cancel: &CancelHandle,
    ) -> Result<BatchRun, BatchError> {
        self.config.validate()?;

        let ids = dedupe(patient_ids);
        if ids.is_empty() {
            return Err(BatchError::EmptyBatch);
        }

        let lookup = ids.clone();
        let (resolved, missing) = self
            .with_store(move |store| {
                let mut resolved = Vec::with_capacity(lookup.len());
                let mut missing = Vec::new();
                for id in lookup {
                    match store.get(&id)? {
                        Some(record) => resolved.push(record),
                        None => missing.push(id),
                    }
                }
                Ok((resolved, missing))
            })
            .await?;
        if resolved.is_empty() {
            return Err(BatchError::NoResolvablePatients {
                requested: ids.len(),
            });
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("batch", run_id = %run_id, items = ids.len());
        let run = BatchRun::new(&run_id, ids);

        self.execute(run, resolved, missing, progress, cancel)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run: BatchRun,
        resolved: Vec<PatientRecord>,
        missing: Vec<String>,
        progress: &dyn ProgressReporter,
        cancel: &CancelHandle,
    ) -> Result<BatchRun, BatchError> {
        info!(
            resolved = resolved.len(),
            missing = missing.len(),
            concurrency = self.config.concurrency,
            "starting batch"
        );

        let stop = StopSignal::new(cancel.clone());
        let mut state = RunState {
            run,
            seq: 0,
            fatal: None,
            progress,
        };

        for id in &missing {
            let error = ItemError::not_found(id);
            warn!(patient_id = %id, "patient not found");
            state.apply(
                id,
                PipelineItemStatus::failed(error.stage(), error.code(), &error.to_string()),
            );
        }

        let (message_tx, mut message_rx) = mpsc::unbounded_channel();
        let workers = self.config.concurrency.min(resolved.len());
        let mut pool = WorkerPool::start(Arc::clone(&self.pipeline), workers, message_tx, stop.clone())
            .map_err(|e| BatchError::InvalidConfig(e.to_string()))?;

        for patient in resolved {
            if let Err(e) = pool.submit(Job::new(patient)) {
                debug!(error = %e, "stopped queueing items");
                break;
            }
        }
        pool.close();

        while let Some(message) = message_rx.recv().await {
            match message {
                WorkerMessage::Transition { patient_id, status } => {
                    state.apply(&patient_id, status);
                }
                WorkerMessage::Warning(warning) => state.run.warnings.push(warning),
                WorkerMessage::Finished {
                    patient_id,
                    outcome,
                } => self.settle(&mut state, &stop, &patient_id, outcome).await,
            }
        }

        pool.wait().await;

        let RunState {
            mut run, fatal, ..
        } = state;
        run.finish(cancel.is_cancelled(), stop.is_halted());

        info!(
            succeeded = run.succeeded,
            failed = run.failed,
            skipped = run.skipped,
            cancelled = run.cancelled,
            halted = run.halted,
            "batch finished"
        );

        match fatal {
            Some(error) => {
                error!(error = %error, "batch aborted");
                Err(BatchError::DeliveryAuth {
                    message: error.to_string(),
                    run: Box::new(run),
                })
            }
            None => Ok(run),
        }
    }

    /// Applies the side effects of a finished item. Halts are raised before
    /// the store write so idle workers see them on their next check.
    async fn settle(
        &self,
        state: &mut RunState<'_>,
        stop: &StopSignal,
        patient_id: &str,
        outcome: ItemOutcome,
    ) {
        match outcome {
            ItemOutcome::Sent { receipt, .. } => {
                let delivery = DeliveryRecord {
                    run_id: state.run.run_id.clone(),
                    patient_id: patient_id.to_string(),
                    sent_at: receipt.accepted_at,
                    message_id: receipt.message_id,
                };
                let written = self
                    .with_store(move |store| store.record_delivery(&delivery))
                    .await;
                if let Err(e) = written {
                    state.store_warning(patient_id, e.to_string());
                }
            }
            ItemOutcome::Failed(error) => {
                if self.config.halt_on_first_failure && !stop.is_halted() {
                    info!(patient_id = %patient_id, "halting after first failure");
                    stop.halt();
                }
                let failure = FailureRecord {
                    run_id: state.run.run_id.clone(),
                    patient_id: patient_id.to_string(),
                    stage: error.stage().to_string(),
                    reason: error.to_string(),
                    failed_at: Utc::now(),
                };
                let written = self
                    .with_store(move |store| store.record_failure(&failure))
                    .await;
                if let Err(e) = written {
                    state.store_warning(patient_id, e.to_string());
                }
            }
            ItemOutcome::Stopped => {
                debug!(patient_id = %patient_id, "item stopped before completion");
            }
            ItemOutcome::Fatal(error) => {
                stop.halt();
                if state.fatal.is_none() {
                    state.fatal = Some(error);
                }
            }
        }
    }

    /// Runs a record store call on the blocking pool. SQLite I/O and its busy
    /// timeout must not stall the runtime thread that drives the workers.
    async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

struct RunState<'a> {
    run: BatchRun,
    seq: u64,
    fatal: Option<DeliveryError>,
    progress: &'a dyn ProgressReporter,
}

impl RunState<'_> {
    fn apply(&mut self, patient_id: &str, status: PipelineItemStatus) {
        match self.run.apply(patient_id, status.clone()) {
            Ok(previous) => {
                self.seq += 1;
                self.progress.report(ProgressEvent::new(
                    &self.run.run_id,
                    self.seq,
                    patient_id,
                    previous,
                    status,
                ));
            }
            Err(e) => error!(error = %e, "dropping transition"),
        }
    }

    fn store_warning(&mut self, patient_id: &str, error: String) {
        warn!(patient_id = %patient_id, error = %error, "record store write failed");
        self.run.warnings.push(RunWarning::StoreWriteFailed {
            patient_id: patient_id.to_string(),
            error,
        });
    }
}

/// Trims ids and drops blanks and repeats, keeping first occurrences in order.
fn dedupe(patient_ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    patient_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}
