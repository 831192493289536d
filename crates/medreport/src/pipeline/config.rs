use std::path::PathBuf;

use crate::config::loader::MAX_CONCURRENCY;
use crate::config::Config;
use crate::retry::RetryPolicy;

use super::error::BatchError;

/// Closing line of report emails when no sender name is configured.
pub const DEFAULT_SIGNATURE: &str = "AI Health Report Manager";

/// Settings for one batch run, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Worker pool width (1..=32).
    pub concurrency: usize,
    /// Stop starting items and stages after the first item failure.
    pub halt_on_first_failure: bool,
    pub retry: RetryPolicy,
    /// Upper bound on normalized history + symptoms sent to the generator.
    pub max_summary_chars: usize,
    /// Directory receiving a copy of every rendered PDF.
    pub archive_dir: Option<PathBuf>,
    pub signature: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            halt_on_first_failure: false,
            retry: RetryPolicy::default(),
            max_summary_chars: 4000,
            archive_dir: None,
            signature: DEFAULT_SIGNATURE.to_string(),
        }
    }
}

impl BatchConfig {
    pub fn from_config(config: &Config) -> Self {
        let signature = config
            .email
            .sender_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_SIGNATURE)
            .to_string();

        Self {
            concurrency: config.batch.concurrency,
            halt_on_first_failure: config.batch.halt_on_first_failure,
            retry: config.retry.policy(),
            max_summary_chars: config.generation.max_summary_chars,
            archive_dir: config.batch.archive_dir.as_ref().map(PathBuf::from),
            signature,
        }
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(BatchError::InvalidConfig(format!(
                "concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(BatchError::InvalidConfig(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_summary_chars == 0 {
            return Err(BatchError::InvalidConfig(
                "max_summary_chars must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
