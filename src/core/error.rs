//! Typed error taxonomy for the token-issuance core.
//!
//! The core returns these; the HTTP layer maps them to OAuth2 error codes
//! and status codes. Internal detail is logged, never sent to the client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-correctable request malformation.
    #[error("{0}")]
    InvalidRequest(String),

    /// Requested scope is outside what the subject may hold.
    #[error("{0}")]
    InvalidScope(String),

    /// Expired, reused, or mismatched code/PKCE. The flow must restart
    /// from authorization.
    #[error("{0}")]
    InvalidGrant(String),

    /// Client authentication failed.
    #[error("{0}")]
    InvalidClient(String),

    #[error("unsupported grant_type")]
    UnsupportedGrantType,

    /// Bad username/password. User-correctable; the attempt is retried.
    #[error("incorrect username or password")]
    IncorrectCredentials,

    /// Bad TOTP code. User-correctable; the attempt is retried.
    #[error("incorrect OTP code")]
    IncorrectOtp,

    /// An entity referenced internally does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// No signing key exists. Deployment misconfiguration, fatal.
    #[error("no signing key configured")]
    NoSigningKey,

    /// Storage or signing failure. Logged and surfaced as a generic 500.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Standard OAuth2 error code for the JSON error body.
    #[must_use]
    pub const fn oauth_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidScope(_) => "invalid_scope",
            // Unknown codes are indistinguishable from consumed ones.
            Self::InvalidGrant(_) | Self::NotFound(_) => "invalid_grant",
            Self::InvalidClient(_) => "invalid_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::IncorrectCredentials | Self::IncorrectOtp => "access_denied",
            Self::NoSigningKey | Self::Internal(_) => "server_error",
        }
    }

    /// Whether the user can correct this and retry within the same flow.
    #[must_use]
    pub const fn is_user_correctable(&self) -> bool {
        matches!(self, Self::IncorrectCredentials | Self::IncorrectOtp)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
