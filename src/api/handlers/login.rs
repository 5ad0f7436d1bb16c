//! Primary credential check.

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use std::sync::Arc;

use super::types::{LoginRequest, OtpEnrollmentBody, StepResponse};
use super::{browser_session, oauth_error, IdpState};
use crate::core::flow::NextStep;

pub(super) fn step_response(step: &NextStep) -> StepResponse {
    match step {
        // begin() never hands Password to a POST handler; render it anyway.
        NextStep::Password => StepResponse {
            next_step: "password".to_string(),
            scope: None,
            consent_required: None,
            otp_enrollment: None,
        },
        NextStep::Otp { enrollment } => StepResponse {
            next_step: "otp".to_string(),
            scope: None,
            consent_required: None,
            otp_enrollment: enrollment.as_ref().map(|e| OtpEnrollmentBody {
                secret: e.secret_base32.clone(),
                qr_code: e.qr_code_data_url.clone(),
            }),
        },
        NextStep::Consent {
            scope,
            consent_required,
        } => StepResponse {
            next_step: "consent".to_string(),
            scope: Some(scope.clone()),
            consent_required: Some(*consent_required),
            otp_enrollment: None,
        },
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Password accepted; body names the next step", body = StepResponse),
        (status = 401, description = "Incorrect username or password; retry", body = super::types::OAuthErrorBody),
        (status = 400, description = "No authorization flow in progress", body = super::types::OAuthErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<IdpState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let (session_id, mut browser) = match browser_session(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return oauth_error(&err.into()),
    };

    match state
        .flow
        .submit_password(&mut browser, &request.username, &request.password)
        .await
    {
        Ok(step) => {
            state.browser_sessions.put(&session_id, browser).await;
            (StatusCode::OK, Json(step_response(&step))).into_response()
        }
        Err(err) => {
            if err.is_user_correctable() {
                // Keep the parked context so the user can retry.
                state.browser_sessions.put(&session_id, browser).await;
            }
            oauth_error(&err)
        }
    }
}
