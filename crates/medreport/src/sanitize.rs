//! Helpers for sanitizing data before it enters log lines and span attributes.
//!
//! Logs are safe to share for debugging; these functions keep patient contact
//! details and clinical text out of them.

/// Maximum number of characters of free text allowed into a log line.
const MAX_LOGGED_TEXT: usize = 120;

/// Masks the local part of an email address, keeping the first character and the domain.
///
/// - `jane.doe@example.com` → `j***@example.com`
/// - `not-an-email` → `<redacted>`
pub fn redact_email(address: &str) -> String {
    match address.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{}***@{}", first, domain)
        }
        _ => "<redacted>".to_string(),
    }
}

/// Truncates free text (error bodies, service messages) for logging.
pub fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > MAX_LOGGED_TEXT {
        let head: String = trimmed.chars().take(MAX_LOGGED_TEXT).collect();
        format!("{}... (truncated)", head)
    } else {
        trimmed.to_string()
    }
}
