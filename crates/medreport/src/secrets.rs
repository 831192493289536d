//! Credential resolution for the AI service key and the SMTP password.
//!
//! A [`SecretSource`] names up to three places a secret can come from, tried in
//! priority order:
//!
//! 1. **Direct value** - for quick local testing (`"value": "..."`)
//! 2. **File reference** - for the Docker secrets pattern (`"file": "/run/secrets/smtp"`)
//! 3. **Env var reference** - for `.env` files and production (`"envVar": "GEMINI_API_KEY"`)

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret resolved from {origin} is empty")]
    Empty { origin: String },
}

/// Result type for secret resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Where to find one secret. Empty strings count as "not provided".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    /// Inline value. Not recommended outside local testing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Path to a file containing the secret (`~` is expanded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Name of an environment variable holding the secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl SecretSource {
    /// A source that only reads the given environment variable.
    pub fn from_env(name: &str) -> Self {
        Self {
            value: None,
            file: None,
            env_var: Some(name.to_string()),
        }
    }

    /// Resolves the secret, failing when no source is configured or the
    /// configured source is unavailable.
    pub fn resolve(&self) -> Result<SecretString> {
        if self.value.as_deref().is_some_and(|v| !v.is_empty()) {
            log::warn!(
                "Using an inline secret value is not recommended. \
                 Consider using a file or an environment variable instead."
            );
        }
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }
}

/// Resolves a secret from the first non-empty source:
/// direct value, then file contents, then environment variable.
///
/// File and env values are trimmed; a source that yields only whitespace is
/// reported as [`SecretError::Empty`] instead of silently falling through.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
                path: expanded.clone(),
                source: e,
            })?;
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return Err(SecretError::Empty {
                    origin: format!("file '{}'", expanded),
                });
            }
            return Ok(SecretString::from(trimmed.to_string()));
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                Ok(value) => {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        Err(SecretError::Empty {
                            origin: format!("environment variable '{}'", var_name),
                        })
                    } else {
                        Ok(SecretString::from(trimmed))
                    }
                }
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Expands `~` and `~/path` to the user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
