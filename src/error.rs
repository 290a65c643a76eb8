use std::fmt;

#[derive(Debug)]
pub enum ChatLoopError {
    /// Missing or rejected credential (HTTP 401 or no key configured).
    Authentication(String),
    /// HTTP 429 without a usable Retry-After header.
    RateLimited(String),
    /// HTTP 500; safe to retry at the caller's discretion.
    Server(String),
    /// Any other non-success status with an unstructured body.
    ApiError {
        status: u16,
        message: String,
    },
    /// Non-success status whose body carried the standard error envelope.
    Structured {
        code: Option<String>,
        error_type: Option<String>,
        param: Option<String>,
        message: String,
    },
    /// Response missing choices or a message; not retried.
    MalformedResponse(String),
    /// The event stream could not be decoded.
    StreamDecode(String),
    /// Truncation ran out of removable history.
    ContextLengthExhausted,
    Canceled,
    ToolError(String),
    NetworkError(reqwest::Error),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
    Other(String),
}

impl ChatLoopError {
    /// Whether this error signals that the conversation no longer fits the
    /// model's context window and history truncation should be attempted.
    pub fn is_context_length_exceeded(&self) -> bool {
        matches!(
            self,
            ChatLoopError::Structured { code: Some(code), .. } if code == "context_length_exceeded"
        )
    }
}

impl fmt::Display for ChatLoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatLoopError::Authentication(msg) => write!(f, "Authentication error: {}", msg),
            ChatLoopError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            ChatLoopError::Server(msg) => write!(f, "Server error (retryable): {}", msg),
            ChatLoopError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            ChatLoopError::Structured {
                code,
                error_type,
                param,
                message,
            } => {
                write!(f, "API error: {}", message)?;
                if let Some(code) = code {
                    write!(f, " (code: {})", code)?;
                }
                if let Some(error_type) = error_type {
                    write!(f, " (type: {})", error_type)?;
                }
                if let Some(param) = param {
                    write!(f, " (param: {})", param)?;
                }
                Ok(())
            }
            ChatLoopError::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
            ChatLoopError::StreamDecode(msg) => write!(f, "Stream decode error: {}", msg),
            ChatLoopError::ContextLengthExhausted => {
                write!(f, "Response length exceeded and no history left to truncate")
            }
            ChatLoopError::Canceled => {
                write!(f, "Request canceled, possibly due to timeout")
            }
            ChatLoopError::ToolError(msg) => write!(f, "Tool error: {}", msg),
            ChatLoopError::NetworkError(e) => write!(f, "Network error: {}", e),
            ChatLoopError::IoError(e) => write!(f, "IO error: {}", e),
            ChatLoopError::JsonError(e) => write!(f, "JSON error: {}", e),
            ChatLoopError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ChatLoopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChatLoopError::NetworkError(e) => Some(e),
            ChatLoopError::IoError(e) => Some(e),
            ChatLoopError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ChatLoopError {
    fn from(err: reqwest::Error) -> Self {
        ChatLoopError::NetworkError(err)
    }
}

impl From<std::io::Error> for ChatLoopError {
    fn from(err: std::io::Error) -> Self {
        ChatLoopError::IoError(err)
    }
}

impl From<serde_json::Error> for ChatLoopError {
    fn from(err: serde_json::Error) -> Self {
        ChatLoopError::JsonError(err)
    }
}

impl From<anyhow::Error> for ChatLoopError {
    fn from(err: anyhow::Error) -> Self {
        ChatLoopError::Other(err.to_string())
    }
}

impl From<String> for ChatLoopError {
    fn from(msg: String) -> Self {
        ChatLoopError::Other(msg)
    }
}

impl From<&str> for ChatLoopError {
    fn from(msg: &str) -> Self {
        ChatLoopError::Other(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatLoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_length_detection() {
        let err = ChatLoopError::Structured {
            code: Some("context_length_exceeded".to_string()),
            error_type: Some("invalid_request_error".to_string()),
            param: None,
            message: "This model's maximum context length is 8192 tokens".to_string(),
        };
        assert!(err.is_context_length_exceeded());

        let other = ChatLoopError::Structured {
            code: Some("invalid_api_key".to_string()),
            error_type: None,
            param: None,
            message: "bad key".to_string(),
        };
        assert!(!other.is_context_length_exceeded());
        assert!(!ChatLoopError::Canceled.is_context_length_exceeded());
    }

    #[test]
    fn structured_display_includes_metadata() {
        let err = ChatLoopError::Structured {
            code: Some("rate_limit".to_string()),
            error_type: Some("requests".to_string()),
            param: Some("model".to_string()),
            message: "slow down".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("slow down"));
        assert!(text.contains("code: rate_limit"));
        assert!(text.contains("param: model"));
    }
}
