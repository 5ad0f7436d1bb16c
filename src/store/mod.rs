//! Persistence surface for the identity provider.
//!
//! `Store` is the only seam between the core and storage. The Postgres
//! implementation backs deployments; the in-memory one backs tests.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{AuthorizationCode, Client, KeyPair, User, UserConsent, UserSession};

#[async_trait]
pub trait Store: Send + Sync {
    // users
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_user_by_subject(&self, subject: Uuid) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Persist mutable user fields (today: the OTP secret).
    async fn update_user(&self, user: &User) -> Result<()>;

    // clients
    async fn get_client_by_id(&self, id: Uuid) -> Result<Option<Client>>;
    async fn get_client_by_identifier(&self, identifier: &str) -> Result<Option<Client>>;

    // authorization codes
    async fn create_code(&self, code: &AuthorizationCode) -> Result<()>;
    /// Fetch a code by value without touching its `used` flag.
    async fn get_code(&self, value: &str) -> Result<Option<AuthorizationCode>>;
    /// Atomically flip `used` from false to true and return the code.
    /// Returns `None` when the code does not exist or was already used;
    /// concurrent callers see exactly one `Some`.
    async fn redeem_code(&self, value: &str) -> Result<Option<AuthorizationCode>>;
    /// Purge expired codes. Returns how many were removed.
    async fn delete_expired_codes(&self, now_unix: i64) -> Result<u64>;

    // signing keys
    /// The key with the highest id signs all new tokens.
    async fn current_signing_key(&self) -> Result<Option<KeyPair>>;
    async fn get_signing_key_by_id(&self, id: i64) -> Result<Option<KeyPair>>;

    // SSO sessions
    async fn get_user_session_by_identifier(
        &self,
        session_identifier: &str,
    ) -> Result<Option<UserSession>>;
    async fn create_user_session(&self, session: &UserSession) -> Result<()>;
    async fn update_user_session(&self, session: &UserSession) -> Result<()>;

    // consent
    async fn get_user_consent(
        &self,
        user_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<UserConsent>>;
    /// Insert or overwrite the consent row for (user, client).
    async fn save_user_consent(&self, consent: &UserConsent) -> Result<()>;
}
