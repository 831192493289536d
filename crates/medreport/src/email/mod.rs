//! Outbound report delivery over SMTP.

pub mod address;
pub mod error;
pub mod mailer;
pub mod message;
pub mod smtp;

pub use address::is_valid_email;
pub use error::{classify_smtp_reply, DeliveryError};
pub use mailer::{DisabledMailer, Mailer};
pub use message::{report_filename, report_message, Attachment, DeliveryReceipt, OutgoingMessage};
pub use smtp::{SmtpMailer, SmtpSettings};
