use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ratelimit::{RateLimit, RateLimiter, ResourceClass};
use crate::retry::RetryPolicy;
use crate::secrets::SecretSource;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            database: DatabaseConfig::default(),
            generation: GenerationConfig::default(),
            email: EmailConfig::default(),
            batch: BatchSettings::default(),
            retry: RetrySettings::default(),
            rate_limits: RateLimitSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file. Defaults to `~/.medreport/data/medreport.db`.
    #[serde(default)]
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match &self.path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

/// AI report generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key")]
    pub api_key: SecretSource,
    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on the normalized clinical summary sent to the service.
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_api_key() -> SecretSource {
    SecretSource::from_env("GEMINI_API_KEY")
}

fn default_call_timeout() -> u64 {
    60
}

fn default_max_summary_chars() -> usize {
    4000
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: default_api_key(),
            timeout_secs: default_call_timeout(),
            max_summary_chars: default_max_summary_chars(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Outbound SMTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    /// 587 uses STARTTLS, 465 implicit TLS.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Sender address; resolved like a secret so it can live in `.env`.
    #[serde(default = "default_sender")]
    pub sender: SecretSource,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default = "default_password")]
    pub password: SecretSource,
    #[serde(default = "default_call_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_sender() -> SecretSource {
    SecretSource::from_env("SENDER_EMAIL")
}

fn default_password() -> SecretSource {
    SecretSource::from_env("SENDER_PASSWORD")
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            sender: default_sender(),
            sender_name: None,
            password: default_password(),
            timeout_secs: default_call_timeout(),
        }
    }
}

impl EmailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Worker pool width.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub halt_on_first_failure: bool,
    /// Directory receiving a copy of every rendered PDF.
    #[serde(default)]
    pub archive_dir: Option<String>,
}

fn default_concurrency() -> usize {
    3
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            halt_on_first_failure: false,
            archive_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_slow_multiplier")]
    pub slow_multiplier: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_slow_multiplier() -> u32 {
    4
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            slow_multiplier: default_slow_multiplier(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
            slow_multiplier: self.slow_multiplier,
        }
    }
}

/// Per-minute call ceilings. `null` disables the limit for that class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_generations_per_minute")]
    pub generations_per_minute: Option<u32>,
    #[serde(default = "default_emails_per_minute")]
    pub emails_per_minute: Option<u32>,
    /// How long a worker may wait for a permit before the call counts as failed.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_generations_per_minute() -> Option<u32> {
    Some(15)
}

fn default_emails_per_minute() -> Option<u32> {
    Some(30)
}

fn default_acquire_timeout() -> u64 {
    120
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            generations_per_minute: default_generations_per_minute(),
            emails_per_minute: default_emails_per_minute(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl RateLimitSettings {
    pub fn limiter(&self) -> RateLimiter {
        let mut limiter = RateLimiter::new(Duration::from_secs(self.acquire_timeout_secs));
        if let Some(n) = self.generations_per_minute {
            limiter = limiter.with_limit(ResourceClass::Generation, RateLimit::per_minute(n));
        }
        if let Some(n) = self.emails_per_minute {
            limiter = limiter.with_limit(ResourceClass::Email, RateLimit::per_minute(n));
        }
        limiter
    }
}
