//! Token minting.
//!
//! Every token is an RS256 JWT signed with the current key; the header's
//! `kid` lets verifiers pick the right public key after rotation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::IdpConfig;
use super::error::{CoreError, CoreResult};
use super::jwt;
use super::keys::KeyManager;
use super::rbac;
use super::utils::now_unix;
use crate::model::{AuthorizationCode, Client, User};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub scope: String,
    /// RBAC-resolved `resource:permission` tokens this bearer holds.
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub email: String,
    pub preferred_username: String,
    pub acr: String,
    pub amr: Vec<String>,
    pub sid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub scope: String,
    pub sid: String,
}

/// JSON body of a successful token response.
#[derive(Clone, Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    keys: KeyManager,
    config: IdpConfig,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(keys: KeyManager, config: IdpConfig) -> Self {
        Self { keys, config }
    }

    /// Mint the token set for a redeemed authorization code.
    ///
    /// The ID token is included only when `openid` was granted; the
    /// refresh token only when `offline_access` was granted and the client
    /// may hold one.
    ///
    /// # Errors
    /// Returns `NoSigningKey` when no key exists, `Internal` on signing
    /// failure.
    pub async fn generate_for_auth_code(
        &self,
        code: &AuthorizationCode,
        user: &User,
        client: &Client,
    ) -> CoreResult<TokenResponse> {
        let key = self.keys.current().await?;
        let now = now_unix();
        let issuer = self.config.issuer_base_url().to_string();
        let expires_in = self.config.access_token_ttl_seconds();
        let amr: Vec<String> = code
            .auth_methods
            .split_whitespace()
            .map(String::from)
            .collect();

        let permissions: Vec<String> = code
            .scope
            .split_whitespace()
            .filter(|token| !rbac::is_non_resource_scope(token))
            .map(String::from)
            .collect();

        let access_claims = AccessTokenClaims {
            iss: issuer.clone(),
            sub: user.subject.to_string(),
            aud: client.client_identifier.clone(),
            exp: now + expires_in,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            scope: code.scope.clone(),
            permissions,
            acr: Some(code.acr_level.as_str().to_string()),
            amr: Some(amr.clone()),
            sid: Some(code.session_identifier.clone()),
        };
        let access_token = self.sign(&key.private_key_pem, &key.kid(), &access_claims)?;

        let scope_tokens: Vec<&str> = code.scope.split_whitespace().collect();

        let id_token = if scope_tokens.contains(&"openid") {
            let claims = IdTokenClaims {
                iss: issuer.clone(),
                sub: user.subject.to_string(),
                aud: client.client_identifier.clone(),
                exp: now + expires_in,
                iat: now,
                email: user.email.clone(),
                preferred_username: user.username.clone(),
                acr: code.acr_level.as_str().to_string(),
                amr,
                sid: code.session_identifier.clone(),
                nonce: code.nonce.clone(),
            };
            Some(self.sign(&key.private_key_pem, &key.kid(), &claims)?)
        } else {
            None
        };

        let refresh_token = if scope_tokens.contains(&"offline_access")
            && client.allow_offline_access
        {
            let claims = RefreshTokenClaims {
                iss: issuer,
                sub: user.subject.to_string(),
                aud: client.client_identifier.clone(),
                exp: now + self.config.refresh_token_ttl_seconds(),
                iat: now,
                jti: Uuid::new_v4().to_string(),
                scope: code.scope.clone(),
                sid: code.session_identifier.clone(),
            };
            Some(self.sign(&key.private_key_pem, &key.kid(), &claims)?)
        } else {
            None
        };

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope: code.scope.clone(),
            id_token,
            refresh_token,
        })
    }

    /// Mint an access token for a client-credentials grant. No user, no
    /// ID token, no refresh token.
    ///
    /// # Errors
    /// Returns `NoSigningKey` when no key exists, `Internal` on signing
    /// failure.
    pub async fn generate_for_client_credentials(
        &self,
        client: &Client,
        scope: &str,
    ) -> CoreResult<TokenResponse> {
        let key = self.keys.current().await?;
        let now = now_unix();
        let expires_in = self.config.access_token_ttl_seconds();

        let claims = AccessTokenClaims {
            iss: self.config.issuer_base_url().to_string(),
            sub: client.client_identifier.clone(),
            aud: client.client_identifier.clone(),
            exp: now + expires_in,
            iat: now,
            jti: Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            permissions: scope.split_whitespace().map(String::from).collect(),
            acr: None,
            amr: None,
            sid: None,
        };
        let access_token = self.sign(&key.private_key_pem, &key.kid(), &claims)?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope: scope.to_string(),
            id_token: None,
            refresh_token: None,
        })
    }

    /// Verify an access token presented at a protected endpoint: resolve
    /// the key from the `kid` header, check the signature, issuer, and
    /// expiry, and return the claims.
    ///
    /// # Errors
    /// Returns `InvalidGrant` for anything short of a valid, live token.
    pub async fn verify_access_token(&self, token: &str) -> CoreResult<AccessTokenClaims> {
        let header = jwt::decode_header(token)
            .map_err(|e| CoreError::InvalidGrant(format!("malformed token: {e}")))?;
        let key = self.keys.by_kid(&header.kid).await?;

        let claims: AccessTokenClaims = jwt::verify_rs256(token, &key.public_key_pem)
            .map_err(|e| CoreError::InvalidGrant(format!("token verification failed: {e}")))?;

        if claims.iss != self.config.issuer_base_url() {
            return Err(CoreError::InvalidGrant("unexpected issuer".to_string()));
        }
        if claims.exp <= now_unix() {
            return Err(CoreError::InvalidGrant("token expired".to_string()));
        }
        Ok(claims)
    }

    /// Whether verified claims authorize access to any of the scopes a
    /// resource demands.
    #[must_use]
    pub fn is_authorized_for(claims: &AccessTokenClaims, allowed_scopes: &[&str]) -> bool {
        rbac::holds_any_scope(&claims.permissions, allowed_scopes)
    }

    fn sign<T: Serialize>(&self, private_key_pem: &str, kid: &str, claims: &T) -> CoreResult<String> {
        jwt::sign_rs256(private_key_pem, kid, claims)
            .map_err(|e| CoreError::Internal(anyhow::anyhow!("failed to sign token: {e}")))
    }
}
