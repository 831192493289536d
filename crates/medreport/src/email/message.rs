//! Report email contents.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::records::PatientRecord;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// File attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One email ready to hand to a [`Mailer`](super::Mailer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Attachment,
}

/// Confirmation that the server accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
    /// Server reply text, if any.
    pub response: String,
}

/// Attachment filename for a patient's report.
pub fn report_filename(patient_id: &str) -> String {
    let safe: String = patient_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("Health_Report_{}.pdf", safe)
}

/// Builds the report email for a patient.
pub fn report_message(
    patient: &PatientRecord,
    report_date: DateTime<Utc>,
    signature: &str,
    pdf: Vec<u8>,
) -> OutgoingMessage {
    let body = format!(
        "Dear {name},\n\n\
         Please find attached your health report generated on {date}.\n\n\
         This report contains important information about your health status and \
         recommendations for your wellbeing.\n\n\
         If you have any questions about this report, please consult with your \
         healthcare provider.\n\n\
         Best regards,\n\
         {signature}\n",
        name = patient.name,
        date = report_date.format("%Y-%m-%d"),
        signature = signature,
    );

    OutgoingMessage {
        to: patient.email.clone(),
        to_name: Some(patient.name.clone()),
        subject: format!("Health Report - {}", patient.name),
        body,
        attachment: Attachment {
            filename: report_filename(&patient.id),
            content_type: PDF_CONTENT_TYPE.to_string(),
            bytes: pdf,
        },
    }
}
