//! Delivery error types.

use thiserror::Error;

use crate::retry::RetryDecision;

/// Errors from sending one report email.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The server rejected the sender credentials. Credentials are shared by
    /// the whole batch, so this aborts the run.
    #[error("SMTP authentication failed: {0}")]
    Auth(String),

    /// The server permanently refused the recipient or the message.
    #[error("Recipient rejected{}: {message}", code_suffix(.code))]
    RecipientRejected { code: Option<u16>, message: String },

    /// Temporary failure before the message was accepted (4xx, connection, TLS,
    /// no rate-limit permit). Safe to retry.
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// The send timed out after the message may have been handed to the
    /// server. Never retried, so the patient cannot receive a duplicate.
    #[error("Delivery unconfirmed: {0}")]
    Unconfirmed(String),

    /// The message could not be built (bad sender address, attachment type).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

fn code_suffix(code: &Option<u16>) -> String {
    code.map(|c| format!(" ({})", c)).unwrap_or_default()
}

impl DeliveryError {
    /// Stable short code used in item statuses and batch summaries.
    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::Auth(_) => "auth",
            DeliveryError::RecipientRejected { .. } => "recipient-rejected",
            DeliveryError::Transient(_) => "transient",
            DeliveryError::Unconfirmed(_) => "unconfirmed",
            DeliveryError::InvalidMessage(_) => "invalid-message",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Whether this error must abort the whole batch rather than one item.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, DeliveryError::Auth(_))
    }

    pub fn retry_decision(&self) -> RetryDecision {
        if self.is_retryable() {
            RetryDecision::Retry
        } else {
            RetryDecision::Stop
        }
    }
}

/// Maps an SMTP reply code to a delivery error.
///
/// - 530/534/535/538 and 454 are authentication failures
/// - other 4xx replies are transient
/// - 5xx replies (550, 551, 553, 501, ...) reject the recipient or message
pub fn classify_smtp_reply(code: u16, message: &str) -> DeliveryError {
    match code {
        454 | 530 | 534 | 535 | 538 => DeliveryError::Auth(format!("{} {}", code, message)),
        400..=499 => DeliveryError::Transient(format!("{} {}", code, message)),
        _ => DeliveryError::RecipientRejected {
            code: Some(code),
            message: message.to_string(),
        },
    }
}
