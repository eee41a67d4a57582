use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

const BODY_PREVIEW_LEN: usize = 200;

/// A single entry of a GraphQL `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }
}

/// Raw failure of the external query executor.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("network error: {message}")]
    Network { message: String },
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {status}")]
    Http { status: u16, body: String },
    #[error("query returned {} error(s)", .errors.len())]
    GraphQl {
        errors: Vec<GraphQlError>,
        data: Option<Value>,
    },
    #[error("malformed response: {message}")]
    Decode { message: String },
}

impl BackendError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn graphql(messages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::GraphQl {
            errors: messages.into_iter().map(GraphQlError::new).collect(),
            data: None,
        }
    }

    /// Classified code plus whether a retry may succeed.
    pub fn classify(&self) -> ErrorClass {
        match self {
            BackendError::Network { .. } => ErrorClass::retryable(ErrorCode::Network),
            BackendError::Timeout => ErrorClass::retryable(ErrorCode::Timeout),
            BackendError::Http { status, .. } => {
                let code = if *status == 429 {
                    ErrorCode::RateLimit
                } else {
                    ErrorCode::Http(*status)
                };
                ErrorClass {
                    code,
                    retryable: *status >= 500 || *status == 429,
                }
            }
            BackendError::GraphQl { errors, .. } => classify_graphql(errors),
            BackendError::Decode { .. } => ErrorClass::permanent(ErrorCode::Decode),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classify().retryable
    }
}

fn classify_graphql(errors: &[GraphQlError]) -> ErrorClass {
    let messages: Vec<String> = errors.iter().map(|e| e.message.to_lowercase()).collect();
    let any = |needle: &str| messages.iter().any(|message| message.contains(needle));

    if any("cannot query field") {
        ErrorClass::permanent(ErrorCode::InvalidField)
    } else if any("rate limit") {
        ErrorClass::retryable(ErrorCode::RateLimit)
    } else if any("timeout") {
        ErrorClass::retryable(ErrorCode::Timeout)
    } else if any("temporary") {
        ErrorClass::retryable(ErrorCode::Temporary)
    } else {
        ErrorClass::permanent(ErrorCode::GraphQlValidation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Network,
    Timeout,
    RateLimit,
    Temporary,
    Http(u16),
    GraphQlValidation,
    InvalidField,
    Decode,
    CircuitOpen,
    Cancelled,
}

/// Serialized as its wire code, e.g. `"HTTP_503"`.
impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Network => f.write_str("NETWORK_ERROR"),
            ErrorCode::Timeout => f.write_str("TIMEOUT"),
            ErrorCode::RateLimit => f.write_str("RATE_LIMIT"),
            ErrorCode::Temporary => f.write_str("TEMPORARY_ERROR"),
            ErrorCode::Http(status) => write!(f, "HTTP_{status}"),
            ErrorCode::GraphQlValidation => f.write_str("GRAPHQL_VALIDATION_ERROR"),
            ErrorCode::InvalidField => f.write_str("INVALID_FIELD"),
            ErrorCode::Decode => f.write_str("DECODE_ERROR"),
            ErrorCode::CircuitOpen => f.write_str("CIRCUIT_OPEN"),
            ErrorCode::Cancelled => f.write_str("CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClass {
    pub code: ErrorCode,
    pub retryable: bool,
}

impl ErrorClass {
    fn retryable(code: ErrorCode) -> Self {
        Self {
            code,
            retryable: true,
        }
    }

    fn permanent(code: ErrorCode) -> Self {
        Self {
            code,
            retryable: false,
        }
    }
}

/// Error surfaced to callers of the request executor.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The backend was called and failed; carries the raw error.
    #[error("[{code}] {message}")]
    Backend {
        code: ErrorCode,
        message: String,
        attempts: u32,
        #[source]
        source: BackendError,
    },
    /// The breaker rejected the call without contacting the backend.
    #[error("backend is temporarily unavailable (circuit breaker open)")]
    CircuitOpen,
    #[error("response payload did not match the expected shape: {0}")]
    Payload(#[source] serde_json::Error),
    #[error("request was cancelled before completion")]
    Cancelled,
}

impl RequestError {
    /// Wraps a backend failure with its classified code and a readable message.
    pub fn enhance(source: BackendError, attempts: u32) -> Self {
        let class = source.classify();
        let message = match &source {
            BackendError::GraphQl { errors, .. } => errors
                .iter()
                .map(|error| error.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            BackendError::Http { status, body } => {
                let preview: String = body.chars().take(BODY_PREVIEW_LEN).collect();
                if preview.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {preview}")
                }
            }
            other => other.to_string(),
        };
        Self::Backend {
            code: class.code,
            message,
            attempts,
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            RequestError::Backend { code, .. } => *code,
            RequestError::CircuitOpen => ErrorCode::CircuitOpen,
            RequestError::Payload(_) => ErrorCode::Decode,
            RequestError::Cancelled => ErrorCode::Cancelled,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RequestError::CircuitOpen)
    }

    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            RequestError::Backend { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RequestError::Backend { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(BackendError::network("connection reset").is_retryable());
        assert!(BackendError::Timeout.is_retryable());
    }

    #[test]
    fn http_status_classification() {
        let http = |status| BackendError::Http {
            status,
            body: String::new(),
        };
        assert_eq!(
            http(503).classify(),
            ErrorClass {
                code: ErrorCode::Http(503),
                retryable: true
            }
        );
        assert_eq!(http(429).classify().code, ErrorCode::RateLimit);
        assert!(http(429).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(!http(400).is_retryable());
    }

    #[test]
    fn graphql_message_heuristics() {
        let class = |message: &str| BackendError::graphql([message]).classify();
        assert_eq!(
            class("Cannot query field \"foo\" on type \"Product\"."),
            ErrorClass {
                code: ErrorCode::InvalidField,
                retryable: false
            }
        );
        assert_eq!(class("Rate limit exceeded").code, ErrorCode::RateLimit);
        assert!(class("Upstream timeout").retryable);
        assert!(class("temporary failure in resolver").retryable);
        assert_eq!(
            class("Variable \"$first\" got invalid value"),
            ErrorClass {
                code: ErrorCode::GraphQlValidation,
                retryable: false
            }
        );
    }

    #[test]
    fn decode_errors_are_permanent() {
        assert!(!BackendError::decode("expected object").is_retryable());
    }

    #[test]
    fn enhance_joins_graphql_messages() {
        let error = RequestError::enhance(BackendError::graphql(["first", "second"]), 1);
        assert_eq!(error.code(), ErrorCode::GraphQlValidation);
        assert_eq!(error.to_string(), "[GRAPHQL_VALIDATION_ERROR] first; second");
        assert!(error.backend_error().is_some());
    }

    #[test]
    fn enhance_keeps_http_body_preview() {
        let error = RequestError::enhance(
            BackendError::Http {
                status: 502,
                body: "x".repeat(500),
            },
            3,
        );
        assert_eq!(error.code().to_string(), "HTTP_502");
        assert_eq!(error.attempts(), 3);
        let message = error.to_string();
        assert!(message.starts_with("[HTTP_502] HTTP 502: xxx"));
        assert!(message.len() < 250);
    }

    #[test]
    fn circuit_open_is_distinct_from_backend_failure() {
        let error = RequestError::CircuitOpen;
        assert!(error.is_circuit_open());
        assert_eq!(error.code(), ErrorCode::CircuitOpen);
        assert!(error.backend_error().is_none());
    }
}
