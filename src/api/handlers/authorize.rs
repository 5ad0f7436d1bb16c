//! The authorization endpoint: entry point of every front-channel flow.

use axum::extract::{Extension, Query};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::{debug, error};

use super::types::AuthorizeParams;
use super::{browser_cookie, browser_session, oauth_error, IdpState};
use crate::core::error::CoreError;
use crate::core::flow::{AuthorizeRequest, NextStep};

/// Start an authorization code flow.
///
/// Validation failures answer with a JSON error instead of redirecting:
/// until the client and redirect URI check out, the redirect target is
/// untrusted.
#[utoipa::path(
    get,
    path = "/authorize",
    params(AuthorizeParams),
    responses(
        (status = 302, description = "Redirect to the login or consent step"),
        (status = 400, description = "Request failed validation", body = super::types::OAuthErrorBody)
    ),
    tag = "oauth"
)]
pub async fn authorize(
    headers: HeaderMap,
    state: Extension<Arc<IdpState>>,
    Query(params): Query<AuthorizeParams>,
) -> impl IntoResponse {
    let (session_id, mut browser) = match browser_session(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => {
            error!("failed to allocate browser session: {err:#}");
            return oauth_error(&CoreError::Internal(err));
        }
    };

    let request = AuthorizeRequest {
        client_id: params.client_id,
        redirect_uri: params.redirect_uri,
        response_type: params.response_type,
        scope: params.scope,
        state: params.state,
        nonce: params.nonce,
        code_challenge: params.code_challenge,
        code_challenge_method: params.code_challenge_method,
    };

    let step = match state.flow.begin(request, &mut browser).await {
        Ok(step) => step,
        Err(err) => return oauth_error(&err),
    };
    state.browser_sessions.put(&session_id, browser).await;

    let location = match step {
        NextStep::Password => "/login",
        NextStep::Otp { .. } => "/otp",
        NextStep::Consent { .. } => "/consent",
    };
    debug!("authorization flow started, next: {location}");

    let mut response_headers = HeaderMap::new();
    if let Ok(location) = location.parse() {
        response_headers.insert(LOCATION, location);
    }
    match browser_cookie(&state.config, &session_id) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("failed to build session cookie: {err}");
            return oauth_error(&CoreError::Internal(err.into()));
        }
    }
    (StatusCode::FOUND, response_headers).into_response()
}
