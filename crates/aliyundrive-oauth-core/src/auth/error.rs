use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::config::ConfigError;

/// Errors surfaced by the authorization proxy and login sessions.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Validation(String),
    #[error("upstream returned {status}: {body}")]
    UpstreamStatus { status: StatusCode, body: String },
    #[error("unexpected upstream response: {0}")]
    MalformedResponse(String),
    #[error("timed out querying QR code status; retry later or poll {status_url} manually")]
    PollTimedOut { status_url: Url },
    #[error("QR code expired; request a new one")]
    QrCodeExpired,
    #[error("invalid or already used authorization code ({status}): {message}")]
    InvalidCode { status: StatusCode, message: String },
    #[error("authorization code missing from request")]
    MissingAuthorizationCode,
    #[error("authorization request denied ({0})")]
    AccessDenied(String),
    #[error("invalid authorization response: {0}")]
    InvalidAuthorizationResponse(String),
    #[error("QR code login was not confirmed within the allowed time")]
    DeadlineExceeded,
    #[error("authorization flow cancelled")]
    Cancelled,
}

impl AuthError {
    /// Whether the error was detected locally without contacting the upstream provider.
    pub fn is_validation(&self) -> bool {
        matches!(self, AuthError::Validation(_))
    }
}
