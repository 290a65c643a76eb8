use std::env;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_USER_AGENT: &str = concat!("chatloop/", env!("CARGO_PKG_VERSION"));
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the completion service.
///
/// Built once and handed to [`crate::api::ApiClient::new`]; changing a field
/// afterwards requires constructing a new client, there is no process-wide
/// singleton to mutate.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub api_endpoint: String,
    pub user_agent: String,
    /// Soft deadline for a whole request. When it elapses the caller sees a
    /// cancellation, and the in-flight transport future is dropped.
    pub request_timeout_secs: u64,
    /// Maximum gap between streamed chunks before the stream is abandoned.
    pub stream_idle_timeout_secs: u64,
}

impl ApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            stream_idle_timeout_secs: DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_stream_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.stream_idle_timeout_secs = secs;
        self
    }

    /// Reads configuration from `CHATLOOP_API_KEY`, `CHATLOOP_API_ENDPOINT`,
    /// `CHATLOOP_REQUEST_TIMEOUT` and `CHATLOOP_STREAM_IDLE_TIMEOUT`.
    /// Only the key is required; everything else falls back to defaults.
    pub fn from_env() -> crate::error::Result<Self> {
        let api_key = env::var("CHATLOOP_API_KEY").map_err(|_| {
            crate::error::ChatLoopError::Authentication(
                "CHATLOOP_API_KEY environment variable not set".to_string(),
            )
        })?;

        let mut config = Self::new(api_key);
        if let Ok(endpoint) = env::var("CHATLOOP_API_ENDPOINT") {
            if !endpoint.is_empty() {
                config.api_endpoint = endpoint;
            }
        }
        if let Some(secs) = parse_env_secs("CHATLOOP_REQUEST_TIMEOUT") {
            config.request_timeout_secs = secs;
        }
        if let Some(secs) = parse_env_secs("CHATLOOP_STREAM_IDLE_TIMEOUT") {
            config.stream_idle_timeout_secs = secs;
        }
        Ok(config)
    }
}

fn parse_env_secs(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
