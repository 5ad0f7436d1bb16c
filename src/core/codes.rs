//! Authorization code issuance and redemption.

use std::sync::Arc;
use uuid::Uuid;

use super::error::{CoreError, CoreResult};
use super::utils::{generate_url_safe_token, now_unix};
use crate::model::{AcrLevel, AuthorizationCode, CodeChallengeMethod};
use crate::store::Store;

/// Entropy of a code value, in bytes, before base64url encoding.
const CODE_VALUE_BYTES: usize = 64;

/// Everything the flow knows when it mints a code.
pub struct IssueCodeParams {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub scope: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub nonce: Option<String>,
    pub acr_level: AcrLevel,
    pub auth_methods: String,
    pub session_identifier: String,
}

#[derive(Clone)]
pub struct CodeIssuer {
    store: Arc<dyn Store>,
    ttl_seconds: i64,
}

impl CodeIssuer {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ttl_seconds: i64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Mint and persist a fresh single-use code.
    ///
    /// # Errors
    /// Returns `Internal` on storage or randomness failure.
    pub async fn issue(&self, params: IssueCodeParams) -> CoreResult<AuthorizationCode> {
        let now = now_unix();
        let code = AuthorizationCode {
            id: Uuid::new_v4(),
            code: generate_url_safe_token(CODE_VALUE_BYTES)?,
            user_id: params.user_id,
            client_id: params.client_id,
            scope: params.scope,
            redirect_uri: params.redirect_uri,
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
            nonce: params.nonce,
            acr_level: params.acr_level,
            auth_methods: params.auth_methods,
            session_identifier: params.session_identifier,
            used: false,
            created_at_unix: now,
            expires_at_unix: now + self.ttl_seconds,
        };
        self.store.create_code(&code).await?;
        Ok(code)
    }

    /// Fetch a code for validation without consuming it.
    ///
    /// # Errors
    /// Returns `InvalidGrant` for unknown, already-used, or expired codes.
    pub async fn lookup_active(&self, value: &str) -> CoreResult<AuthorizationCode> {
        let code = self
            .store
            .get_code(value)
            .await?
            .ok_or_else(|| CoreError::InvalidGrant("unknown authorization code".to_string()))?;
        if code.used {
            return Err(CoreError::InvalidGrant(
                "authorization code already used".to_string(),
            ));
        }
        if code.is_expired(now_unix()) {
            return Err(CoreError::InvalidGrant(
                "authorization code expired".to_string(),
            ));
        }
        Ok(code)
    }

    /// Consume a code. Exactly one caller wins; everyone else gets
    /// `InvalidGrant`, indistinguishable from an unknown code.
    ///
    /// # Errors
    /// Returns `InvalidGrant` when the code is unknown, already consumed,
    /// or expired.
    pub async fn redeem(&self, value: &str) -> CoreResult<AuthorizationCode> {
        let code = self.store.redeem_code(value).await?.ok_or_else(|| {
            CoreError::InvalidGrant("authorization code already used or unknown".to_string())
        })?;
        if code.is_expired(now_unix()) {
            return Err(CoreError::InvalidGrant(
                "authorization code expired".to_string(),
            ));
        }
        Ok(code)
    }

    /// Remove codes past their expiry. Returns how many were purged.
    ///
    /// # Errors
    /// Returns `Internal` on storage failure.
    pub async fn purge_expired(&self) -> CoreResult<u64> {
        Ok(self.store.delete_expired_codes(now_unix()).await?)
    }
}
