//! Token request validation.
//!
//! Runs the full rejection chain before any token is minted: grant type,
//! client authentication, code freshness, redirect URI equality, PKCE.
//! Validation never consumes the code; the token endpoint redeems it
//! atomically after validation passes.

use std::sync::Arc;

use super::codes::CodeIssuer;
use super::error::{CoreError, CoreResult};
use super::pkce;
use super::rbac;
use super::utils::secrets_match;
use crate::model::{AuthorizationCode, Client, User};
use crate::store::Store;

/// Form fields of a token request.
#[derive(Clone, Debug, Default)]
pub struct TokenRequestInput {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

/// A validated request, carrying everything the issuer needs.
pub enum ValidatedTokenRequest {
    AuthorizationCode {
        client: Client,
        user: User,
        code: AuthorizationCode,
    },
    ClientCredentials {
        client: Client,
        scope: String,
    },
}

#[derive(Clone)]
pub struct TokenValidator {
    store: Arc<dyn Store>,
    codes: CodeIssuer,
}

impl TokenValidator {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, codes: CodeIssuer) -> Self {
        Self { store, codes }
    }

    /// Validate a token request end to end.
    ///
    /// # Errors
    /// Returns the typed error matching the first failed check; see the
    /// `CoreError` taxonomy for the OAuth codes each maps to.
    pub async fn validate(&self, input: &TokenRequestInput) -> CoreResult<ValidatedTokenRequest> {
        match input.grant_type.as_str() {
            "authorization_code" => self.validate_authorization_code(input).await,
            "client_credentials" => self.validate_client_credentials(input).await,
            _ => Err(CoreError::UnsupportedGrantType),
        }
    }

    async fn resolve_client(&self, input: &TokenRequestInput) -> CoreResult<Client> {
        let client_id = input
            .client_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::InvalidRequest("client_id is required".to_string()))?;
        self.store
            .get_client_by_identifier(client_id)
            .await?
            .ok_or_else(|| CoreError::InvalidClient("unknown client".to_string()))
    }

    fn authenticate_client(client: &Client, input: &TokenRequestInput) -> CoreResult<()> {
        if client.is_public {
            // Public clients prove possession via PKCE, never a secret.
            if input.client_secret.as_deref().is_some_and(|s| !s.is_empty()) {
                return Err(CoreError::InvalidClient(
                    "public clients must not send a client_secret".to_string(),
                ));
            }
            return Ok(());
        }

        let expected = client.client_secret.as_deref().ok_or_else(|| {
            CoreError::Internal(anyhow::anyhow!(
                "confidential client {} has no secret configured",
                client.client_identifier
            ))
        })?;
        let presented = input
            .client_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CoreError::InvalidClient("client_secret is required".to_string())
            })?;
        if !secrets_match(presented, expected) {
            return Err(CoreError::InvalidClient("invalid client_secret".to_string()));
        }
        Ok(())
    }

    async fn validate_authorization_code(
        &self,
        input: &TokenRequestInput,
    ) -> CoreResult<ValidatedTokenRequest> {
        let client = self.resolve_client(input).await?;
        Self::authenticate_client(&client, input)?;

        let code_value = input
            .code
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::InvalidRequest("code is required".to_string()))?;
        let code = self.codes.lookup_active(code_value).await?;

        if code.client_id != client.id {
            return Err(CoreError::InvalidGrant(
                "code was issued to a different client".to_string(),
            ));
        }

        let redirect_uri = input
            .redirect_uri
            .as_deref()
            .ok_or_else(|| CoreError::InvalidRequest("redirect_uri is required".to_string()))?;
        if redirect_uri != code.redirect_uri {
            return Err(CoreError::InvalidGrant(
                "redirect_uri does not match the one the code was issued for".to_string(),
            ));
        }

        if let (Some(challenge), Some(method)) =
            (code.code_challenge.as_deref(), code.code_challenge_method)
        {
            let verifier = input
                .code_verifier
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    CoreError::InvalidGrant("code_verifier is required".to_string())
                })?;
            if !pkce::verify(verifier, challenge, method) {
                return Err(CoreError::InvalidGrant(
                    "code_verifier does not match the code challenge".to_string(),
                ));
            }
        } else if client.is_public {
            return Err(CoreError::InvalidGrant(
                "public client code is missing its PKCE challenge".to_string(),
            ));
        }

        let user = self
            .store
            .get_user_by_id(code.user_id)
            .await?
            .ok_or(CoreError::NotFound("user"))?;

        Ok(ValidatedTokenRequest::AuthorizationCode { client, user, code })
    }

    async fn validate_client_credentials(
        &self,
        input: &TokenRequestInput,
    ) -> CoreResult<ValidatedTokenRequest> {
        let client = self.resolve_client(input).await?;
        if client.is_public {
            return Err(CoreError::InvalidClient(
                "public clients may not use client_credentials".to_string(),
            ));
        }
        Self::authenticate_client(&client, input)?;

        // Requested scope narrows to the intersection with the client's
        // permissions; nothing left means the request was out of bounds.
        let requested = input.scope.as_deref().unwrap_or("");
        let scope = rbac::filter_scope_for_client(requested, &client);
        if scope.is_empty() {
            return Err(CoreError::InvalidScope(
                "requested scope is outside the client's permissions".to_string(),
            ));
        }

        Ok(ValidatedTokenRequest::ClientCredentials { client, scope })
    }
}
