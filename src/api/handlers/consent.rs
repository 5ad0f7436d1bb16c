//! Consent decision: the flow's terminal front-channel step.

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use std::sync::Arc;

use super::types::{CompletedResponse, ConsentRequest};
use super::{browser_session, oauth_error, IdpState};

#[utoipa::path(
    post,
    path = "/auth/consent",
    request_body = ConsentRequest,
    responses(
        (status = 200, description = "Flow finished; redirect the browser", body = CompletedResponse),
        (status = 400, description = "Flow is not at the consent step", body = super::types::OAuthErrorBody)
    ),
    tag = "auth"
)]
pub async fn consent(
    headers: HeaderMap,
    state: Extension<Arc<IdpState>>,
    Json(request): Json<ConsentRequest>,
) -> impl IntoResponse {
    let (session_id, mut browser) = match browser_session(&state, &headers).await {
        Ok(pair) => pair,
        Err(err) => return oauth_error(&err.into()),
    };

    match state
        .flow
        .consent_decision(&mut browser, request.approved)
        .await
    {
        Ok(completed) => {
            // The SSO session identifier survives on the browser session.
            state.browser_sessions.put(&session_id, browser).await;
            (
                StatusCode::OK,
                Json(CompletedResponse {
                    redirect_url: completed.redirect_url,
                }),
            )
                .into_response()
        }
        Err(err) => oauth_error(&err),
    }
}
