//! OIDC userinfo, a protected resource served by the provider itself.

use axum::extract::Extension;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::types::{OAuthErrorBody, UserInfoResponse};
use super::IdpState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.trim().strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn unauthorized(description: &str) -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(OAuthErrorBody {
            error: "invalid_token".to_string(),
            error_description: description.to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/userinfo",
    responses(
        (status = 200, description = "Identity claims for the token's subject", body = UserInfoResponse),
        (status = 401, description = "Missing, invalid, or expired token", body = OAuthErrorBody),
        (status = 403, description = "Token lacks the openid scope", body = OAuthErrorBody)
    ),
    tag = "oauth"
)]
pub async fn userinfo(headers: HeaderMap, state: Extension<Arc<IdpState>>) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return unauthorized("missing bearer token");
    };

    let claims = match state.issuer.verify_access_token(token).await {
        Ok(claims) => claims,
        Err(_) => return unauthorized("token verification failed"),
    };

    if !claims.scope.split_whitespace().any(|s| s == "openid") {
        return (
            StatusCode::FORBIDDEN,
            Json(OAuthErrorBody {
                error: "insufficient_scope".to_string(),
                error_description: "token lacks the openid scope".to_string(),
            }),
        )
            .into_response();
    }

    let Ok(subject) = Uuid::parse_str(&claims.sub) else {
        return unauthorized("token subject is not a user");
    };
    match state.store.get_user_by_subject(subject).await {
        Ok(Some(user)) => Json(UserInfoResponse {
            sub: user.subject.to_string(),
            email: user.email,
            preferred_username: user.username,
        })
        .into_response(),
        Ok(None) => unauthorized("unknown subject"),
        Err(err) => {
            error!("failed to load user for userinfo: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
