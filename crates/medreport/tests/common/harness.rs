//! Test harness for isolated batch execution.
//!
//! The `TestHarness` struct wires a real `Pipeline` and `BatchController` to:
//! - a `ScriptedGenerator` and a `ScriptedMailer`
//! - an `InMemoryRecordStore` seeded with the given patients
//! - a temporary directory for archived PDFs
//! - a retry policy without delays and an unlimited rate limiter

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use medreport::pipeline::{
    BatchConfig, BatchController, BatchError, BatchRun, CancelHandle, Pipeline,
};
use medreport::ratelimit::RateLimiter;
use medreport::records::PatientRecord;
use medreport::render::PdfRenderer;
use medreport::retry::RetryPolicy;
use medreport::store::{InMemoryRecordStore, RecordStore};

use super::fakes::{CollectingProgress, ScriptedGenerator, ScriptedMailer};

pub struct TestHarness {
    temp_dir: TempDir,
    pub store: Arc<InMemoryRecordStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub mailer: Arc<ScriptedMailer>,
    pub limiter: Arc<RateLimiter>,
    pub config: BatchConfig,
}

impl TestHarness {
    pub fn new(patients: Vec<PatientRecord>) -> Self {
        Self::with_generator(patients, ScriptedGenerator::new())
    }

    pub fn with_generator(patients: Vec<PatientRecord>, generator: ScriptedGenerator) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            temp_dir,
            store: Arc::new(InMemoryRecordStore::with_records(patients)),
            generator: Arc::new(generator),
            mailer: Arc::new(ScriptedMailer::new()),
            limiter: Arc::new(RateLimiter::unlimited()),
            config: BatchConfig {
                retry: RetryPolicy::immediate(3),
                ..BatchConfig::default()
            },
        }
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.config.concurrency = workers;
        self
    }

    pub fn halt_on_first_failure(mut self) -> Self {
        self.config.halt_on_first_failure = true;
        self
    }

    pub fn max_summary_chars(mut self, chars: usize) -> Self {
        self.config.max_summary_chars = chars;
        self
    }

    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    /// Enables the archive directory and returns its path.
    pub fn enable_archive(&mut self) -> PathBuf {
        let dir = self.temp_dir.path().join("archive");
        self.config.archive_dir = Some(dir.clone());
        dir
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.generator.clone(),
            Arc::new(PdfRenderer::new()),
            self.mailer.clone(),
            self.limiter.clone(),
            &self.config,
        )
    }

    pub fn controller(&self) -> BatchController {
        let store: Arc<dyn RecordStore> = self.store.clone();
        BatchController::new(Arc::new(self.pipeline()), store, self.config.clone())
    }

    /// Runs a batch with a fresh progress collector.
    pub async fn run(&self, ids: &[String]) -> (Result<BatchRun, BatchError>, CollectingProgress) {
        let progress = CollectingProgress::new();
        let result = self.run_with(ids, &progress, &CancelHandle::new()).await;
        (result, progress)
    }

    pub async fn run_with(
        &self,
        ids: &[String],
        progress: &CollectingProgress,
        cancel: &CancelHandle,
    ) -> Result<BatchRun, BatchError> {
        self.controller().run_batch(ids, progress, cancel).await
    }

    pub fn stored(&self, id: &str) -> PatientRecord {
        self.store
            .get(id)
            .expect("store read failed")
            .expect("patient missing from store")
    }
}
