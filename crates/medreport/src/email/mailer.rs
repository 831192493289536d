use async_trait::async_trait;

use super::error::DeliveryError;
use super::message::{DeliveryReceipt, OutgoingMessage};

/// Sends one message. Each successful call delivers exactly one email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Stand-in for contexts that never send, such as report previews.
/// Every call fails without side effects.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _message: &OutgoingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        Err(DeliveryError::InvalidMessage(
            "mail delivery is not configured".to_string(),
        ))
    }
}
