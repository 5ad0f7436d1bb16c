//! HTTP handlers and the state they share.

pub mod authorize;
pub mod consent;
pub mod health;
pub mod login;
pub mod otp;
pub mod token;
pub mod types;
pub mod userinfo;

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{InvalidHeaderValue, COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use tracing::error;

use crate::core::codes::CodeIssuer;
use crate::core::config::IdpConfig;
use crate::core::context::{BrowserSession, BrowserSessions};
use crate::core::error::CoreError;
use crate::core::flow::AuthorizationFlow;
use crate::core::issuer::TokenIssuer;
use crate::core::keys::KeyManager;
use crate::core::otp::OtpAuthenticator;
use crate::core::session::SessionManager;
use crate::core::validator::TokenValidator;
use crate::store::Store;

use types::OAuthErrorBody;

const BROWSER_COOKIE_NAME: &str = "janua_sid";

/// Everything the handlers need, wired once at startup.
pub struct IdpState {
    pub store: Arc<dyn Store>,
    pub flow: AuthorizationFlow,
    pub validator: TokenValidator,
    pub issuer: TokenIssuer,
    pub codes: CodeIssuer,
    pub keys: KeyManager,
    pub browser_sessions: BrowserSessions,
    pub config: IdpConfig,
}

impl IdpState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: IdpConfig) -> Self {
        let keys = KeyManager::new(store.clone());
        let codes = CodeIssuer::new(store.clone(), config.code_ttl_seconds());
        let sessions = SessionManager::new(store.clone());
        let otp = OtpAuthenticator::new(config.otp_issuer());
        let flow = AuthorizationFlow::new(store.clone(), sessions, codes.clone(), otp);
        let validator = TokenValidator::new(store.clone(), codes.clone());
        let issuer = TokenIssuer::new(keys.clone(), config.clone());
        let browser_sessions =
            BrowserSessions::new(Duration::from_secs(config.auth_context_ttl_seconds()));
        Self {
            store,
            flow,
            validator,
            issuer,
            codes,
            keys,
            browser_sessions,
            config,
        }
    }
}

/// Read the browser session id cookie, if any.
pub(crate) fn extract_browser_session_id(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == BROWSER_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

/// Build the `Set-Cookie` value for the browser session id.
pub(crate) fn browser_cookie(
    config: &IdpConfig,
    id: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.auth_context_ttl_seconds();
    let mut cookie =
        format!("{BROWSER_COOKIE_NAME}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Resolve the browser session named by the cookie, or start a fresh one.
/// Returns the id alongside the session so handlers can write it back.
pub(crate) async fn browser_session(
    state: &IdpState,
    headers: &HeaderMap,
) -> anyhow::Result<(String, BrowserSession)> {
    if let Some(id) = extract_browser_session_id(headers) {
        if let Some(session) = state.browser_sessions.get(&id).await {
            return Ok((id, session));
        }
    }
    let id = state.browser_sessions.create().await?;
    Ok((id, BrowserSession::default()))
}

/// Map a core error onto an OAuth2 JSON error response. Internal detail is
/// logged and never leaked.
pub(crate) fn oauth_error(err: &CoreError) -> Response {
    let status = match err {
        CoreError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
        CoreError::IncorrectCredentials | CoreError::IncorrectOtp => StatusCode::UNAUTHORIZED,
        CoreError::NoSigningKey | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    let description = if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("request failed: {err:#}");
        "internal server error".to_string()
    } else {
        err.to_string()
    };
    let body = OAuthErrorBody {
        error: err.oauth_code().to_string(),
        error_description: description,
    };
    (status, Json(body)).into_response()
}
