use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::api::models::{ErrorEnvelope, RequestBody};
use crate::config::ApiConfig;
use crate::error::{ChatLoopError, Result};

/// HTTP client for the completion service.
///
/// Owns one `reqwest::Client` for the life of the configuration; a config
/// change means constructing a new `ApiClient`, not mutating this one.
pub struct ApiClient {
    config: ApiConfig,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| {
                ChatLoopError::Other(format!("Invalid user-agent header: {}", e))
            })?,
        );

        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Sends one request, re-issuing it after the advertised delay on 429
    /// responses that carry an integer `Retry-After`. The loop is unbounded
    /// here; the caller's soft timeout bounds it.
    pub async fn send(&self, body: &RequestBody) -> Result<reqwest::Response> {
        if self.config.api_key.is_empty() {
            return Err(ChatLoopError::Authentication(
                "no API key configured".to_string(),
            ));
        }

        loop {
            debug!(
                endpoint = %self.config.api_endpoint,
                model = %body.model,
                stream = body.stream,
                message_count = body.messages.len(),
                "sending chat completion request"
            );

            let response = self
                .http
                .post(&self.config.api_endpoint)
                .bearer_auth(&self.config.api_key)
                .json(body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                let message = response.text().await.unwrap_or_default();

                if let Some(secs) = retry_after {
                    warn!(retry_after_secs = secs, "rate limited, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
                    continue;
                }
                return Err(ChatLoopError::RateLimited(message));
            }

            return Err(Self::classify_failure(status, response).await);
        }
    }

    async fn classify_failure(status: StatusCode, response: reqwest::Response) -> ChatLoopError {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        match status.as_u16() {
            401 => ChatLoopError::Authentication(text),
            500 => ChatLoopError::Server(text),
            code => match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => ChatLoopError::Structured {
                    code: envelope.error.code,
                    error_type: envelope.error.error_type,
                    param: envelope.error.param,
                    message: envelope
                        .error
                        .message
                        .unwrap_or_else(|| format!("HTTP {}", code)),
                },
                Err(_) => ChatLoopError::ApiError {
                    status: code,
                    message: text,
                },
            },
        }
    }
}
