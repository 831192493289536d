//! The bulk report pipeline: per-item stages, the run state machine and the
//! controller that drives a batch.

pub mod archive;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod progress;
pub mod run;
pub mod runner;
pub mod status;

pub use archive::ReportArchive;
pub use config::{BatchConfig, DEFAULT_SIGNATURE};
pub use context::{CancelHandle, ItemTracker, ReportArtifact, StopSignal};
pub use controller::BatchController;
pub use error::{BatchError, ItemError, RunWarning};
pub use progress::{BroadcastProgress, LogProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use run::{BatchRun, BatchSummary, FailedItem, TransitionError};
pub use runner::{ItemOutcome, Pipeline};
pub use status::{PipelineItemStatus, Stage};
