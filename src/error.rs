//! Error taxonomy for repository tracking and trigger requests.
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use thiserror::Error;

/// Categorized failure of a tracking request or its supervision.
///
/// Trigger failures propagate to callers as one of these variants; fetch
/// failures inside sync loops are logged and swallowed instead (best-effort
/// sync) and never surface here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication required: {0}")]
    Auth(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("timed out waiting for repository to appear; background processing may still complete")]
    Timeout,
    #[error("{0}")]
    Unknown(String),
}

static NETWORK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)network|connection|timed? ?out|unreachable").unwrap());
static AUTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)auth|token|unauthorized|login|sign.?in").unwrap());
static PERMISSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)permission|forbidden|access denied").unwrap());
static NOT_FOUND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)not found|no such|does not exist").unwrap());

impl TrackError {
    /// Map an HTTP status and/or server-provided message onto a category.
    /// Status wins when present; otherwise the message content decides.
    pub fn categorize(status: Option<StatusCode>, message: &str) -> Self {
        let message = if message.trim().is_empty() {
            "request failed"
        } else {
            message.trim()
        };
        if let Some(status) = status {
            match status {
                StatusCode::UNAUTHORIZED => return TrackError::Auth(message.to_string()),
                StatusCode::FORBIDDEN => return TrackError::Permission(message.to_string()),
                StatusCode::NOT_FOUND => return TrackError::NotFound(message.to_string()),
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    return TrackError::Validation(message.to_string())
                }
                _ => {}
            }
        }
        if AUTH_RE.is_match(message) {
            TrackError::Auth(message.to_string())
        } else if PERMISSION_RE.is_match(message) {
            TrackError::Permission(message.to_string())
        } else if NOT_FOUND_RE.is_match(message) {
            TrackError::NotFound(message.to_string())
        } else if NETWORK_RE.is_match(message) {
            TrackError::Network(message.to_string())
        } else {
            TrackError::Unknown(message.to_string())
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrackError::Network(_) => "network",
            TrackError::Auth(_) => "auth",
            TrackError::Permission(_) => "permission",
            TrackError::NotFound(_) => "not_found",
            TrackError::Validation(_) => "validation",
            TrackError::Timeout => "timeout",
            TrackError::Unknown(_) => "unknown",
        }
    }
}

impl From<reqwest::Error> for TrackError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrackError::Network("request timed out".to_string())
        } else if err.is_connect() {
            TrackError::Network("failed to connect to server".to_string())
        } else {
            TrackError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_takes_precedence() {
        let err = TrackError::categorize(Some(StatusCode::UNAUTHORIZED), "whatever");
        assert_eq!(err.kind(), "auth");
        let err = TrackError::categorize(Some(StatusCode::FORBIDDEN), "whatever");
        assert_eq!(err.kind(), "permission");
        let err = TrackError::categorize(Some(StatusCode::NOT_FOUND), "whatever");
        assert_eq!(err.kind(), "not_found");
        let err = TrackError::categorize(Some(StatusCode::UNPROCESSABLE_ENTITY), "bad owner");
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn message_content_decides_without_status() {
        assert_eq!(
            TrackError::categorize(None, "connection reset by peer").kind(),
            "network"
        );
        assert_eq!(
            TrackError::categorize(None, "invalid token, please sign in").kind(),
            "auth"
        );
        assert_eq!(
            TrackError::categorize(None, "Access denied for this workspace").kind(),
            "permission"
        );
        assert_eq!(
            TrackError::categorize(None, "repository not found").kind(),
            "not_found"
        );
        assert_eq!(
            TrackError::categorize(None, "something odd happened").kind(),
            "unknown"
        );
    }

    #[test]
    fn empty_message_falls_back() {
        let err = TrackError::categorize(None, "   ");
        assert_eq!(err, TrackError::Unknown("request failed".to_string()));
    }

    #[test]
    fn server_errors_without_keyword_are_unknown() {
        let err = TrackError::categorize(Some(StatusCode::INTERNAL_SERVER_ERROR), "oops");
        assert_eq!(err.kind(), "unknown");
    }
}
