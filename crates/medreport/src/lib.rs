//! Bulk health report pipeline.
//!
//! Patient records come from a [`store::RecordStore`]; for each selected
//! patient the pipeline generates a report with an AI service, renders it as
//! a PDF and emails it, with retries, rate limits, progress events and
//! cancellation handled by [`pipeline::BatchController`].

pub mod ai;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod export;
pub mod logging;
pub mod pipeline;
pub mod ratelimit;
pub mod records;
pub mod render;
pub mod retry;
pub mod sanitize;
pub mod secrets;
pub mod store;
pub mod worker;

pub use ai::{GeminiGenerator, GenerationError, ReportGenerator};
pub use broadcast::BatchProgressBroadcaster;
pub use config::{load_config, Config};
pub use db::Database;
pub use email::{DeliveryError, Mailer, SmtpMailer};
pub use error::{ConfigError, MedReportError, Result, WorkerError};
pub use pipeline::{
    BatchConfig, BatchController, BatchError, BatchRun, BatchSummary, CancelHandle, Pipeline,
    PipelineItemStatus, ProgressEvent, ProgressReporter,
};
pub use ratelimit::{RateLimiter, ResourceClass};
pub use records::{PatientRecord, ReportStatus};
pub use render::{DocumentRenderer, PdfRenderer};
pub use retry::{RetryExecutor, RetryPolicy};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use store::{InMemoryRecordStore, RecordStore, SqliteRecordStore};
