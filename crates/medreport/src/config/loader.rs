use std::path::{Path, PathBuf};

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Largest supported worker pool.
pub const MAX_CONCURRENCY: usize = 32;

/// Returns the config file location used when none is given: `~/.medreport/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".medreport").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express. Also applied to configs built in code.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.batch.concurrency == 0 || config.batch.concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::Validation {
            message: format!(
                "batch.concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, config.batch.concurrency
            ),
        });
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.max_attempts must be at least 1".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(ConfigError::Validation {
            message: format!("retry.jitter must be within 0.0..=1.0, got {}", retry.jitter),
        });
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(ConfigError::Validation {
            message: "retry.max_delay_ms must not be smaller than retry.base_delay_ms".to_string(),
        });
    }

    let generation = &config.generation;
    if !(generation.endpoint.starts_with("http://") || generation.endpoint.starts_with("https://"))
    {
        return Err(ConfigError::Validation {
            message: format!("generation.endpoint is not an http(s) URL: {}", generation.endpoint),
        });
    }
    if generation.model.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "generation.model must not be empty".to_string(),
        });
    }
    if generation.max_summary_chars == 0 {
        return Err(ConfigError::Validation {
            message: "generation.max_summary_chars must be at least 1".to_string(),
        });
    }

    if config.email.smtp_host.trim().is_empty() || config.email.smtp_port == 0 {
        return Err(ConfigError::Validation {
            message: "email.smtp_host and email.smtp_port are required".to_string(),
        });
    }

    for (name, limit) in [
        ("generations_per_minute", config.rate_limits.generations_per_minute),
        ("emails_per_minute", config.rate_limits.emails_per_minute),
    ] {
        if limit == Some(0) {
            return Err(ConfigError::Validation {
                message: format!("rate_limits.{} must be at least 1 (or null for no limit)", name),
            });
        }
    }

    Ok(())
}
