//! Runtime configuration for the identity provider core.
//!
//! An explicit value passed into each component at construction; there is
//! no process-wide accessor.

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_CODE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_AUTH_CONTEXT_TTL_SECONDS: u64 = 20 * 60;
const DEFAULT_OTP_ISSUER: &str = "janua";

#[derive(Clone, Debug)]
pub struct IdpConfig {
    issuer_base_url: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    code_ttl_seconds: i64,
    auth_context_ttl_seconds: u64,
    otp_issuer: String,
}

impl IdpConfig {
    #[must_use]
    pub fn new(issuer_base_url: String) -> Self {
        // The issuer claim must not carry a trailing slash.
        let issuer_base_url = issuer_base_url.trim_end_matches('/').to_string();
        Self {
            issuer_base_url,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            auth_context_ttl_seconds: DEFAULT_AUTH_CONTEXT_TTL_SECONDS,
            otp_issuer: DEFAULT_OTP_ISSUER.to_string(),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_auth_context_ttl_seconds(mut self, seconds: u64) -> Self {
        self.auth_context_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_issuer(mut self, issuer: String) -> Self {
        self.otp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn issuer_base_url(&self) -> &str {
        &self.issuer_base_url
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn code_ttl_seconds(&self) -> i64 {
        self.code_ttl_seconds
    }

    #[must_use]
    pub fn auth_context_ttl_seconds(&self) -> u64 {
        self.auth_context_ttl_seconds
    }

    #[must_use]
    pub fn otp_issuer(&self) -> &str {
        &self.otp_issuer
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.issuer_base_url.starts_with("https://")
    }
}
