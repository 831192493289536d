//! SMTP submission via lettre.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use super::error::{classify_smtp_reply, DeliveryError};
use super::mailer::Mailer;
use super::message::{DeliveryReceipt, OutgoingMessage};
use crate::config::EmailConfig;
use crate::error::ConfigError;
use crate::sanitize::redact_email;

/// Port that uses implicit TLS; every other port upgrades with STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Resolved SMTP connection settings.
#[derive(Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub sender_name: Option<String>,
    pub password: SecretString,
    pub timeout: Duration,
}

impl SmtpSettings {
    /// Resolves the sender address and password from the config's secret sources.
    pub fn from_config(config: &EmailConfig) -> Result<Self, ConfigError> {
        let sender = config.sender.resolve()?.expose_secret().to_string();
        if !super::address::is_valid_email(&sender) {
            return Err(ConfigError::Validation {
                message: format!("email.sender is not a valid address: {}", redact_email(&sender)),
            });
        }
        Ok(Self {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            sender,
            sender_name: config.sender_name.clone(),
            password: config.password.resolve()?,
            timeout: config.timeout(),
        })
    }
}

/// [`Mailer`] that submits messages to an authenticated SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    message_id_domain: String,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Result<Self, DeliveryError> {
        let address: Address = settings
            .sender
            .parse()
            .map_err(|e| DeliveryError::InvalidMessage(format!("sender address: {}", e)))?;
        let message_id_domain = address.domain().to_string();
        let from = Mailbox::new(settings.sender_name.clone(), address);

        let builder = if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| DeliveryError::Transient(format!("TLS setup for {}: {}", settings.host, e)))?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.password.expose_secret().to_string(),
            ))
            .timeout(Some(settings.timeout))
            .build();

        info!(
            "SMTP mailer configured for {}:{} as {}",
            settings.host,
            settings.port,
            redact_email(&settings.sender)
        );

        Ok(Self {
            transport,
            from,
            message_id_domain,
            timeout: settings.timeout,
        })
    }

    fn build(&self, message: &OutgoingMessage, message_id: &str) -> Result<Message, DeliveryError> {
        let to_address: Address = message.to.parse().map_err(|e| {
            DeliveryError::RecipientRejected {
                code: None,
                message: format!("invalid recipient address: {}", e),
            }
        })?;
        let to = Mailbox::new(message.to_name.clone(), to_address);

        let content_type = ContentType::parse(&message.attachment.content_type)
            .map_err(|e| DeliveryError::InvalidMessage(format!("attachment content type: {}", e)))?;
        let attachment = MimeAttachment::new(message.attachment.filename.clone())
            .body(message.attachment.bytes.clone(), content_type);

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .message_id(Some(message_id.to_string()))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(message.body.clone()))
                    .singlepart(attachment),
            )
            .map_err(|e| DeliveryError::InvalidMessage(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let message_id = format!("<{}@{}>", uuid::Uuid::new_v4(), self.message_id_domain);
        let email = self.build(message, &message_id)?;

        debug!("Submitting {} to {}", message_id, redact_email(&message.to));

        match tokio::time::timeout(self.timeout, self.transport.send(email)).await {
            Err(_) => Err(DeliveryError::Unconfirmed(format!(
                "no reply from SMTP server within {}s",
                self.timeout.as_secs()
            ))),
            Ok(Ok(response)) => Ok(DeliveryReceipt {
                message_id,
                accepted_at: Utc::now(),
                response: response.message().collect::<Vec<_>>().join(" "),
            }),
            Ok(Err(e)) => {
                let err = map_transport_error(&e);
                warn!(
                    "SMTP send to {} failed ({}): {}",
                    redact_email(&message.to),
                    err.code(),
                    e
                );
                Err(err)
            }
        }
    }
}

fn map_transport_error(e: &lettre::transport::smtp::Error) -> DeliveryError {
    if e.is_timeout() {
        return DeliveryError::Unconfirmed(e.to_string());
    }
    if let Some(code) = e.status() {
        if let Ok(code) = code.to_string().parse::<u16>() {
            return classify_smtp_reply(code, &e.to_string());
        }
    }
    // Connection, TLS and protocol errors without a reply code.
    DeliveryError::Transient(e.to_string())
}
