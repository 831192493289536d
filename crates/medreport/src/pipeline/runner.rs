use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::ai::{GeminiGenerator, GenerationError, PatientSummary, ReportGenerator, ReportRequest};
use crate::config::Config;
use crate::email::{
    is_valid_email, report_message, DeliveryError, DeliveryReceipt, Mailer, SmtpMailer,
    SmtpSettings,
};
use crate::error::ConfigError;
use crate::ratelimit::{RateLimiter, ResourceClass};
use crate::records::PatientRecord;
use crate::render::{DocumentRenderer, PdfRenderer, RenderError, RenderRequest};
use crate::retry::RetryExecutor;
use crate::sanitize;

use super::archive::ReportArchive;
use super::config::BatchConfig;
use super::context::{ItemTracker, ReportArtifact, StopSignal};
use super::error::{ItemError, RunWarning};
use super::status::PipelineItemStatus;

/// How one item ended inside a worker.
#[derive(Debug)]
pub enum ItemOutcome {
    Sent {
        artifact: ReportArtifact,
        receipt: DeliveryReceipt,
    },
    Failed(ItemError),
    /// Cancelled or halted at a stage boundary, or the tracker refused the
    /// next stage. The item keeps its last status.
    Stopped,
    /// The mail server rejected the credentials. The item stays at `Sending`.
    Fatal(DeliveryError),
}

/// Runs generate → render → send for one patient.
pub struct Pipeline {
    generator: Arc<dyn ReportGenerator>,
    renderer: Arc<dyn DocumentRenderer>,
    mailer: Arc<dyn Mailer>,
    limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    archive: Option<ReportArchive>,
    max_summary_chars: usize,
    signature: String,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn ReportGenerator>,
        renderer: Arc<dyn DocumentRenderer>,
        mailer: Arc<dyn Mailer>,
        limiter: Arc<RateLimiter>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            generator,
            renderer,
            mailer,
            limiter,
            retry: RetryExecutor::new(config.retry.clone()),
            archive: config.archive_dir.clone().map(ReportArchive::new),
            max_summary_chars: config.max_summary_chars,
            signature: config.signature.clone(),
        }
    }

    /// Production constructor: Gemini, lopdf and SMTP, all from config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let generator = GeminiGenerator::from_config(&config.generation)?;
        let settings = SmtpSettings::from_config(&config.email)?;
        let mailer = SmtpMailer::new(settings).map_err(|e| ConfigError::Setup {
            component: "smtp transport",
            message: e.to_string(),
        })?;

        Ok(Self::new(
            Arc::new(generator),
            Arc::new(PdfRenderer::new()),
            Arc::new(mailer),
            Arc::new(config.rate_limits.limiter()),
            &BatchConfig::from_config(config),
        ))
    }

    pub fn archive(&self) -> Option<&ReportArchive> {
        self.archive.as_ref()
    }

    /// Runs every stage for one patient, reporting transitions through `tracker`.
    /// Stops at stage boundaries once `stop` is raised.
    pub async fn run_item(
        &self,
        patient: &PatientRecord,
        tracker: &mut ItemTracker,
        stop: &StopSignal,
    ) -> ItemOutcome {
        let span = info_span!("item",
            patient_id = %patient.id,
            email = %sanitize::redact_email(&patient.email),
        );
        self.run_stages(patient, tracker, stop).instrument(span).await
    }

    async fn run_stages(
        &self,
        patient: &PatientRecord,
        tracker: &mut ItemTracker,
        stop: &StopSignal,
    ) -> ItemOutcome {
        if stop.should_stop() {
            return ItemOutcome::Stopped;
        }

        // Validate: no AI quota is spent on an undeliverable report.
        if !is_valid_email(&patient.email) {
            return fail(tracker, ItemError::invalid_email());
        }

        // Generate
        if !tracker.advance(PipelineItemStatus::Generating) {
            return ItemOutcome::Stopped;
        }
        let artifact = match self
            .generate(patient)
            .instrument(info_span!("generate"))
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => return fail(tracker, e),
        };
        tracker.advance(PipelineItemStatus::Generated);

        if stop.should_stop() {
            return ItemOutcome::Stopped;
        }

        // Render
        if !tracker.advance(PipelineItemStatus::Rendering) {
            return ItemOutcome::Stopped;
        }
        let artifact = {
            let _step = info_span!("render").entered();
            match self.render(patient, artifact) {
                Ok(artifact) => artifact,
                Err(e) => return fail(tracker, e.into()),
            }
        };
        tracker.advance(PipelineItemStatus::Rendered);

        if let Some(ref archive) = self.archive {
            match archive.store(&artifact) {
                Ok(path) => debug!(path = %path.display(), "archived report"),
                Err(e) => {
                    warn!(error = %e, "failed to archive report");
                    tracker.warn(RunWarning::ArchiveFailed {
                        patient_id: patient.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if stop.should_stop() {
            return ItemOutcome::Stopped;
        }

        // Send
        if !tracker.advance(PipelineItemStatus::Sending) {
            return ItemOutcome::Stopped;
        }
        match self
            .send(patient, &artifact)
            .instrument(info_span!("send"))
            .await
        {
            Ok(receipt) => {
                info!(message_id = %receipt.message_id, "report sent");
                tracker.advance(PipelineItemStatus::Sent);
                ItemOutcome::Sent { artifact, receipt }
            }
            Err(ItemError::Delivery { error, .. }) if error.is_batch_fatal() => {
                warn!(error = %error, "mail server rejected credentials");
                // Siblings check this before their next send.
                stop.halt();
                ItemOutcome::Fatal(error)
            }
            Err(e) => fail(tracker, e),
        }
    }

    /// Generates and renders a report without sending it.
    pub async fn preview(&self, patient: &PatientRecord) -> Result<ReportArtifact, ItemError> {
        let span = info_span!("preview", patient_id = %patient.id);
        let artifact = self.generate(patient).instrument(span.clone()).await?;
        let artifact = span.in_scope(|| self.render(patient, artifact))?;
        Ok(artifact)
    }

    async fn generate(&self, patient: &PatientRecord) -> Result<ReportArtifact, ItemError> {
        let summary = PatientSummary::build(patient, self.max_summary_chars)
            .map_err(|error| ItemError::Generation { error, attempts: 0 })?;
        let request = ReportRequest::new(patient, summary);
        let request = &request;

        let text = self
            .retry
            .execute(
                "Report generation",
                |attempt| async move {
                    let permit = self
                        .limiter
                        .acquire(ResourceClass::Generation)
                        .await
                        .map_err(|e| GenerationError::Timeout(e.to_string()))?;
                    debug!(attempt, waited_ms = permit.waited.as_millis() as u64, "calling generator");
                    self.generator.generate(request).await
                },
                GenerationError::retry_decision,
            )
            .await?;

        Ok(ReportArtifact::new(&patient.id, text, Utc::now()))
    }

    fn render(
        &self,
        patient: &PatientRecord,
        artifact: ReportArtifact,
    ) -> Result<ReportArtifact, RenderError> {
        let request = RenderRequest::new(patient, &artifact.report_text, artifact.generated_at);
        let pdf = self.renderer.render(&request)?;
        debug!(bytes = pdf.len(), "rendered report");
        Ok(artifact.with_pdf(pdf))
    }

    async fn send(
        &self,
        patient: &PatientRecord,
        artifact: &ReportArtifact,
    ) -> Result<DeliveryReceipt, ItemError> {
        let pdf = artifact
            .pdf
            .clone()
            .ok_or(ItemError::Render(RenderError::MissingField("pdf")))?;
        let message = report_message(patient, artifact.generated_at, &self.signature, pdf);
        let message = &message;

        let receipt = self
            .retry
            .execute(
                "Report delivery",
                |attempt| async move {
                    let permit = self
                        .limiter
                        .acquire(ResourceClass::Email)
                        .await
                        .map_err(|e| DeliveryError::Transient(e.to_string()))?;
                    debug!(attempt, waited_ms = permit.waited.as_millis() as u64, "sending email");
                    self.mailer.send(message).await
                },
                DeliveryError::retry_decision,
            )
            .await?;

        Ok(receipt)
    }
}

fn fail(tracker: &mut ItemTracker, error: ItemError) -> ItemOutcome {
    warn!(stage = %error.stage(), code = error.code(), error = %error, "item failed");
    tracker.advance(PipelineItemStatus::failed(
        error.stage(),
        error.code(),
        &error.to_string(),
    ));
    ItemOutcome::Failed(error)
}
