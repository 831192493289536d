//! AI report generation.

pub mod gemini;
pub mod generator;

pub use gemini::GeminiGenerator;
pub use generator::{GenerationError, PatientSummary, ReportGenerator, ReportRequest};
