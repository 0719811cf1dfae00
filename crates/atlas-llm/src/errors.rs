//! Failures at the generation-service boundary.
//!
//! Everything the adapter can report is folded into [`SDKError`]. Callers
//! above this crate only ever need the message and, occasionally, whether a
//! retry could help.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// What went wrong on the service side, as far as status and message tell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Authentication,
    AccessDenied,
    NotFound,
    InvalidRequest,
    RateLimit,
    Server,
    ContentFilter,
    ContextLength,
    Other,
}

impl ProviderErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::RateLimit | ProviderErrorKind::Server | ProviderErrorKind::Other
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderErrorKind::Authentication => "authentication",
            ProviderErrorKind::AccessDenied => "access_denied",
            ProviderErrorKind::NotFound => "not_found",
            ProviderErrorKind::InvalidRequest => "invalid_request",
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::Server => "server",
            ProviderErrorKind::ContentFilter => "content_filter",
            ProviderErrorKind::ContextLength => "context_length",
            ProviderErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error the generation service reported about a request.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderError {
    pub message: String,
    pub provider: String,
    pub kind: ProviderErrorKind,
    /// HTTP status, when the failure arrived as a non-2xx response.
    pub status_code: Option<u16>,
    /// Service-specific code such as `rate_limit_exceeded`.
    pub error_code: Option<String>,
    pub raw: Option<Value>,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            provider: provider.into(),
            kind,
            status_code: None,
            error_code: None,
            raw: None,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SDKError {
    #[error("{}", .0.message)]
    Provider(ProviderError),
    #[error("request timed out: {0}")]
    RequestTimeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SDKError {
    /// The bare message, without the category prefix `Display` adds.
    pub fn message(&self) -> &str {
        match self {
            SDKError::Provider(err) => &err.message,
            SDKError::RequestTimeout(message)
            | SDKError::Network(message)
            | SDKError::Stream(message)
            | SDKError::Configuration(message) => message,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            SDKError::Provider(err) => err.retryable(),
            SDKError::Configuration(_) => false,
            _ => true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        SDKError::RequestTimeout(message.into())
    }

    pub fn stream(message: impl Into<String>) -> Self {
        SDKError::Stream(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        SDKError::Network(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        SDKError::Configuration(message.into())
    }
}

/// How a non-2xx status should be reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Timeout,
    Provider(ProviderErrorKind),
}

pub fn map_http_status(status: u16) -> Option<StatusClass> {
    let kind = match status {
        408 => return Some(StatusClass::Timeout),
        400 | 422 => ProviderErrorKind::InvalidRequest,
        401 => ProviderErrorKind::Authentication,
        403 => ProviderErrorKind::AccessDenied,
        404 => ProviderErrorKind::NotFound,
        413 => ProviderErrorKind::ContextLength,
        429 => ProviderErrorKind::RateLimit,
        500..=599 => ProviderErrorKind::Server,
        _ => return None,
    };
    Some(StatusClass::Provider(kind))
}

const MESSAGE_SIGNALS: &[(&str, ProviderErrorKind)] = &[
    ("not found", ProviderErrorKind::NotFound),
    ("does not exist", ProviderErrorKind::NotFound),
    ("unauthorized", ProviderErrorKind::Authentication),
    ("invalid api key", ProviderErrorKind::Authentication),
    ("incorrect api key", ProviderErrorKind::Authentication),
    ("rate limit", ProviderErrorKind::RateLimit),
    ("context length", ProviderErrorKind::ContextLength),
    ("context window", ProviderErrorKind::ContextLength),
    ("too many tokens", ProviderErrorKind::ContextLength),
    ("content filter", ProviderErrorKind::ContentFilter),
    ("safety system", ProviderErrorKind::ContentFilter),
];

/// Guess a kind from the message when the status alone is not conclusive.
pub fn classify_message(message: &str) -> Option<ProviderErrorKind> {
    let lower = message.to_ascii_lowercase();
    MESSAGE_SIGNALS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, kind)| *kind)
}

/// Bounds on each phase of a generation call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterTimeout {
    pub connect: Duration,
    /// Whole-call bound for non-streaming calls. Streaming calls only wait
    /// this long for response headers; the body may run longer.
    pub request: Duration,
    /// Longest silence tolerated between two chunks of a stream.
    pub stream_read: Duration,
}

impl Default for AdapterTimeout {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(120),
            stream_read: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_kinds() {
        assert_eq!(
            map_http_status(401),
            Some(StatusClass::Provider(ProviderErrorKind::Authentication))
        );
        assert_eq!(
            map_http_status(503),
            Some(StatusClass::Provider(ProviderErrorKind::Server))
        );
        assert_eq!(map_http_status(408), Some(StatusClass::Timeout));
        assert_eq!(map_http_status(302), None);
    }

    #[test]
    fn messages_are_classified_case_insensitively() {
        assert_eq!(
            classify_message("The model `gpt-x` does not exist"),
            Some(ProviderErrorKind::NotFound)
        );
        assert_eq!(
            classify_message("Rate limit reached for requests"),
            Some(ProviderErrorKind::RateLimit)
        );
        assert_eq!(classify_message("something odd happened"), None);
    }

    #[test]
    fn retryability_follows_the_kind() {
        let limited = SDKError::Provider(ProviderError::new(
            "openai",
            ProviderErrorKind::RateLimit,
            "slow down",
        ));
        assert_eq!(limited.message(), "slow down");
        assert_eq!(limited.to_string(), "slow down");
        assert!(limited.retryable());

        let denied = ProviderError::new("openai", ProviderErrorKind::AccessDenied, "no");
        assert!(!denied.retryable());
        assert!(!SDKError::configuration("missing key").retryable());
        assert_eq!(
            SDKError::stream("cut off").to_string(),
            "stream error: cut off"
        );
    }
}
