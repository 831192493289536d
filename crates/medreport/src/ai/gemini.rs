//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::generator::{GenerationError, ReportGenerator, ReportRequest};
use crate::config::GenerationConfig;
use crate::error::ConfigError;
use crate::sanitize::truncate_for_log;

/// Report generator backed by the Gemini REST API.
pub struct GeminiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

impl GeminiGenerator {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Setup {
                component: "generation client",
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            timeout,
        })
    }

    /// Builds a generator from config, resolving the API key.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, ConfigError> {
        let api_key = config.api_key.resolve()?;
        Self::new(&config.endpoint, &config.model, api_key, config.timeout())
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        )
    }
}

#[async_trait]
impl ReportGenerator for GeminiGenerator {
    async fn generate(&self, request: &ReportRequest) -> Result<String, GenerationError> {
        let prompt = request.prompt();
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: &prompt }],
            }],
        };

        let response = self
            .client
            .post(self.url())
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, self.timeout))?;

        interpret_response(status, retry_after.as_deref(), &text)
    }
}

fn map_transport_error(e: reqwest::Error, timeout: Duration) -> GenerationError {
    // The URL carries the API key, so never let it into messages.
    let e = e.without_url();
    if e.is_timeout() {
        GenerationError::Timeout(format!("no response within {}s", timeout.as_secs()))
    } else {
        GenerationError::ServiceError(e.to_string())
    }
}

/// Maps an HTTP status and body to report text or a typed error.
fn interpret_response(
    status: StatusCode,
    retry_after: Option<&str>,
    body: &str,
) -> Result<String, GenerationError> {
    if !status.is_success() {
        let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let message = envelope
            .as_ref()
            .map(|e| e.error.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| truncate_for_log(body));
        let message = format!("HTTP {}: {}", status.as_u16(), message);

        return Err(match status.as_u16() {
            429 => GenerationError::QuotaExceeded {
                retry_after: retry_after
                    .and_then(parse_retry_after)
                    .or_else(|| envelope.as_ref().and_then(|e| retry_delay_detail(&e.error))),
                message,
            },
            400 | 413 | 422 => GenerationError::InvalidInput(message),
            401 | 403 => GenerationError::Unauthorized(message),
            408 | 504 => GenerationError::Timeout(message),
            _ => GenerationError::ServiceError(message),
        });
    }

    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|e| {
        GenerationError::ServiceError(format!("malformed response body: {}", e))
    })?;

    if let Some(reason) = parsed
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(GenerationError::InvalidInput(format!(
            "prompt blocked by the service ({})",
            reason
        )));
    }

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::ServiceError("response has no candidates".to_string()))?;

    let finish_reason = candidate
        .finish_reason
        .clone()
        .unwrap_or_else(|| "missing".to_string());
    match finish_reason.as_str() {
        "STOP" => {}
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" => {
            return Err(GenerationError::InvalidInput(format!(
                "generation stopped by content filter ({})",
                finish_reason
            )));
        }
        other => {
            return Err(GenerationError::ServiceError(format!(
                "incomplete generation (finish reason {})",
                other
            )));
        }
    }

    let text: String = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::ServiceError(
            "service returned an empty report".to_string(),
        ));
    }
    Ok(text.to_string())
}

/// Parses a `Retry-After` header given in seconds.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Extracts `retryDelay` (e.g. `"7s"`) from a `google.rpc.RetryInfo` error detail.
fn retry_delay_detail(error: &ApiError) -> Option<Duration> {
    error.details.iter().find_map(|detail| {
        let raw = detail.get("retryDelay")?.as_str()?;
        let secs: f64 = raw.strip_suffix('s')?.parse().ok()?;
        if secs.is_finite() && secs >= 0.0 {
            Some(Duration::from_secs_f64(secs))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OK_BODY: &str = r#"{
        "candidates": [{
            "content": { "parts": [{ "text": "Summary paragraph.\n\n" }, { "text": "Second paragraph." }] },
            "finishReason": "STOP"
        }]
    }"#;

    #[test]
    fn test_successful_response_concatenates_parts() {
        let text = interpret_response(StatusCode::OK, None, OK_BODY).unwrap();
        assert_eq!(text, "Summary paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn test_quota_uses_retry_after_header() {
        let err = interpret_response(
            StatusCode::TOO_MANY_REQUESTS,
            Some("12"),
            r#"{"error":{"code":429,"message":"Resource exhausted","status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            GenerationError::QuotaExceeded {
                retry_after: Some(Duration::from_secs(12)),
                message: "HTTP 429: Resource exhausted".to_string()
            }
        );
    }

    #[test]
    fn test_quota_uses_retry_info_detail() {
        let body = r#"{"error":{"code":429,"message":"quota","details":[
            {"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"7s"}]}}"#;
        let err = interpret_response(StatusCode::TOO_MANY_REQUESTS, None, body).unwrap_err();
        assert!(matches!(
            err,
            GenerationError::QuotaExceeded { retry_after: Some(d), .. } if d == Duration::from_secs(7)
        ));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StatusCode::BAD_REQUEST, "invalid-input"),
            (StatusCode::PAYLOAD_TOO_LARGE, "invalid-input"),
            (StatusCode::UNAUTHORIZED, "unauthorized"),
            (StatusCode::FORBIDDEN, "unauthorized"),
            (StatusCode::REQUEST_TIMEOUT, "timeout"),
            (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            (StatusCode::INTERNAL_SERVER_ERROR, "service-error"),
            (StatusCode::SERVICE_UNAVAILABLE, "service-error"),
        ];
        for (status, code) in cases {
            let err = interpret_response(status, None, "oops").unwrap_err();
            assert_eq!(err.code(), code, "status {}", status);
        }
    }

    #[test]
    fn test_incomplete_generation_is_rejected() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Half a rep"}]},"finishReason":"MAX_TOKENS"}]}"#;
        let err = interpret_response(StatusCode::OK, None, body).unwrap_err();
        assert_eq!(err.code(), "service-error");
    }

    #[test]
    fn test_blocked_prompt_is_invalid_input() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let err = interpret_response(StatusCode::OK, None, body).unwrap_err();
        assert_eq!(err.code(), "invalid-input");

        let body = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let err = interpret_response(StatusCode::OK, None, body).unwrap_err();
        assert_eq!(err.code(), "invalid-input");
    }

    #[test]
    fn test_empty_text_is_rejected() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"   "}]},"finishReason":"STOP"}]}"#;
        assert!(interpret_response(StatusCode::OK, None, body).is_err());
    }

    #[test]
    fn test_url_shape() {
        let generator = GeminiGenerator::new(
            "https://generativelanguage.googleapis.com/",
            "gemini-2.0-flash",
            SecretString::from("k"),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            generator.url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
