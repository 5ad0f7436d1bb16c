//! TOTP step-up prompt and check.

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use std::sync::Arc;

use super::login::step_response;
use super::types::OtpRequest;
use super::{browser_session, oauth_error, IdpState};

#[utoipa::path(
    get,
    path = "/auth/otp",
    responses(
        (status = 200, description = "OTP prompt; carries QR material when the user still has to enroll", body = super::types::StepResponse),
        (status = 400, description = "Flow is not waiting for OTP", body = super::types::OAuthErrorBody)
    ),
    tag = "auth"
)]
pub async fn otp_prompt(
    headers: HeaderMap,
    state: Extension<Arc<IdpState>>,
) -> impl IntoResponse {
    let (session_id, mut browser) = match browser_session(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return oauth_error(&err.into()),
    };

    // The prompt may park a fresh enrollment secret; write the session back.
    match state.flow.otp_prompt(&mut browser).await {
        Ok(step) => {
            state.browser_sessions.put(&session_id, browser).await;
            (StatusCode::OK, Json(step_response(&step))).into_response()
        }
        Err(err) => oauth_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/otp",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Code accepted; body names the next step", body = super::types::StepResponse),
        (status = 401, description = "Incorrect code; retry", body = super::types::OAuthErrorBody),
        (status = 400, description = "Flow is not waiting for OTP", body = super::types::OAuthErrorBody)
    ),
    tag = "auth"
)]
pub async fn otp(
    headers: HeaderMap,
    state: Extension<Arc<IdpState>>,
    Json(request): Json<OtpRequest>,
) -> impl IntoResponse {
    let (session_id, mut browser) = match browser_session(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return oauth_error(&err.into()),
    };

    match state.flow.submit_otp(&mut browser, &request.code).await {
        Ok(step) => {
            state.browser_sessions.put(&session_id, browser).await;
            (StatusCode::OK, Json(step_response(&step))).into_response()
        }
        Err(err) => {
            if err.is_user_correctable() {
                state.browser_sessions.put(&session_id, browser).await;
            }
            oauth_error(&err)
        }
    }
}
