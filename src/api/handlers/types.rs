//! Request and response bodies for the public endpoints.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters of `GET /authorize`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OtpRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentRequest {
    pub approved: bool,
}

/// Form body of `POST /token`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequestForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

/// QR material returned when the user must enroll an authenticator.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpEnrollmentBody {
    pub secret: String,
    pub qr_code: String,
}

/// Tells the front end which prompt to render next.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StepResponse {
    /// One of `otp`, `consent`.
    pub next_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_enrollment: Option<OtpEnrollmentBody>,
}

/// Final answer of the front-channel flow: where to send the browser.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CompletedResponse {
    pub redirect_url: String,
}

/// Standard OAuth2 error body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OAuthErrorBody {
    pub error: String,
    pub error_description: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserInfoResponse {
    pub sub: String,
    pub email: String,
    pub preferred_username: String,
}
