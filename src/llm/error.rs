//! Normalized backend errors.
//!
//! Every adapter maps its wire failures onto [`ProviderError`] so callers
//! only ever branch on the class of failure and the HTTP status.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Timeouts, rate limits and server errors. Safe to retry.
    #[error("transient backend error{}: {message}", status_suffix(.status.as_ref()))]
    Transient {
        message: String,
        status: Option<u16>,
        /// Server hint from a `retry-after` header, if any.
        retry_after_ms: Option<u64>,
    },

    /// Bad requests, unknown models and malformed responses.
    #[error("backend error{}: {message}", status_suffix(.status.as_ref()))]
    Permanent { message: String, status: Option<u16> },

    #[error("authentication failed{}: {message}", status_suffix(.status.as_ref()))]
    Authentication { message: String, status: Option<u16> },

    #[error("request cancelled")]
    Cancelled,
}

fn status_suffix(status: Option<&u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl ProviderError {
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            status: None,
        }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            status: None,
            retry_after_ms: None,
        }
    }

    /// Classify a non-success HTTP response.
    #[must_use]
    pub fn from_status(status: u16, body: &str, retry_after_ms: Option<u64>) -> Self {
        let message = extract_error_message(body);
        match status {
            401 | 403 => Self::Authentication {
                message,
                status: Some(status),
            },
            408 | 429 | 500..=599 => Self::Transient {
                message,
                status: Some(status),
                retry_after_ms,
            },
            _ => Self::Permanent {
                message,
                status: Some(status),
            },
        }
    }

    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. }
            | Self::Permanent { status, .. }
            | Self::Authentication { status, .. } => *status,
            Self::Cancelled => None,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Transient { message, .. }
            | Self::Permanent { message, .. }
            | Self::Authentication { message, .. } => message.clone(),
            Self::Cancelled => "request cancelled".to_owned(),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Transient {
                status: Some(429),
                ..
            }
        )
    }

    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    #[must_use]
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Transient { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() || err.is_connect() || (err.is_request() && status.is_none()) {
            return Self::Transient {
                message: err.to_string(),
                status,
                retry_after_ms: None,
            };
        }
        if let Some(status) = status {
            return Self::from_status(status, &err.to_string(), None);
        }
        if err.is_decode() || err.is_body() {
            return Self::Permanent {
                message: format!("malformed response: {err}"),
                status: None,
            };
        }
        Self::Transient {
            message: err.to_string(),
            status: None,
            retry_after_ms: None,
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Permanent {
            message: format!("malformed response: {err}"),
            status: None,
        }
    }
}

/// Pull `error.message` out of a JSON error body; fall back to the raw body.
fn extract_error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let nested = parsed.as_ref().and_then(|v| {
        let entry = match v {
            Value::Array(items) => items.first()?,
            other => other,
        };
        entry
            .get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(Value::as_str)
            .map(str::to_owned)
    });
    match nested {
        Some(message) => message,
        None if body.trim().is_empty() => "empty error response".to_owned(),
        None => body.trim().to_owned(),
    }
}

/// Parse a `retry-after` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}
