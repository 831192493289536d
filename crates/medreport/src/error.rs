use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MedReportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Record store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Report generation error: {0}")]
    Generation(#[from] crate::ai::GenerationError),

    #[error("Render error: {0}")]
    Render(#[from] crate::render::RenderError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] crate::email::DeliveryError),

    #[error("Item failed: {0}")]
    Item(#[from] crate::pipeline::ItemError),

    #[error("Batch error: {0}")]
    Batch(#[from] crate::pipeline::BatchError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

pub type Result<T> = std::result::Result<T, MedReportError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Failed to resolve secret: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Failed to set up {component}: {message}")]
    Setup {
        component: &'static str,
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool needs at least one worker")]
    NoWorkers,

    #[error("Job queue closed")]
    ChannelClosed,
}
