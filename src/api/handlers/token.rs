//! The token endpoint.
//!
//! Validation never consumes the code; redemption happens after every
//! check passes and is atomic, so two concurrent requests with the same
//! code produce exactly one token set.

use axum::extract::Extension;
use axum::response::{IntoResponse, Json, Response};
use axum::Form;
use std::sync::Arc;
use tracing::debug;

use super::types::TokenRequestForm;
use super::{oauth_error, IdpState};
use crate::core::error::CoreResult;
use crate::core::issuer::TokenResponse;
use crate::core::validator::{TokenRequestInput, ValidatedTokenRequest};

#[utoipa::path(
    post,
    path = "/token",
    request_body(content = TokenRequestForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token set issued", body = TokenResponse),
        (status = 400, description = "Invalid request, grant, or scope", body = super::types::OAuthErrorBody),
        (status = 401, description = "Client authentication failed", body = super::types::OAuthErrorBody)
    ),
    tag = "oauth"
)]
pub async fn token(
    state: Extension<Arc<IdpState>>,
    Form(form): Form<TokenRequestForm>,
) -> Response {
    let input = TokenRequestInput {
        grant_type: form.grant_type,
        code: form.code,
        redirect_uri: form.redirect_uri,
        code_verifier: form.code_verifier,
        client_id: form.client_id,
        client_secret: form.client_secret,
        scope: form.scope,
    };

    match issue(&state, &input).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => oauth_error(&err),
    }
}

async fn issue(state: &IdpState, input: &TokenRequestInput) -> CoreResult<TokenResponse> {
    match state.validator.validate(input).await? {
        ValidatedTokenRequest::AuthorizationCode { client, user, code } => {
            // First-wins: losers of the race get invalid_grant here.
            let redeemed = state.codes.redeem(&code.code).await?;
            debug!(client = %client.client_identifier, "authorization code redeemed");
            state
                .issuer
                .generate_for_auth_code(&redeemed, &user, &client)
                .await
        }
        ValidatedTokenRequest::ClientCredentials { client, scope } => {
            debug!(client = %client.client_identifier, "client credentials grant");
            state
                .issuer
                .generate_for_client_credentials(&client, &scope)
                .await
        }
    }
}
