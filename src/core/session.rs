//! SSO session lifecycle.
//!
//! One session per authenticated browser, fanned out to every client that
//! completes an authorization through it. The session identifier is a
//! fresh random token, never derived from the browser cookie.

use std::sync::Arc;
use uuid::Uuid;

use super::error::{CoreError, CoreResult};
use super::utils::{generate_url_safe_token, now_unix};
use crate::model::{AcrLevel, User, UserSession};
use crate::store::Store;

const SESSION_IDENTIFIER_BYTES: usize = 32;

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a session for a freshly authenticated user.
    ///
    /// # Errors
    /// Returns `Internal` on storage or randomness failure.
    pub async fn establish(
        &self,
        user: &User,
        auth_methods: &str,
        acr_level: AcrLevel,
    ) -> CoreResult<UserSession> {
        let now = now_unix();
        let session = UserSession {
            id: Uuid::new_v4(),
            session_identifier: generate_url_safe_token(SESSION_IDENTIFIER_BYTES)?,
            user_id: user.id,
            auth_methods: auth_methods.to_string(),
            acr_level,
            started_at_unix: now,
            last_accessed_unix: now,
            clients: Vec::new(),
        };
        self.store.create_user_session(&session).await?;
        Ok(session)
    }

    /// Look up a session by its identifier.
    ///
    /// # Errors
    /// Returns `NotFound` when the identifier matches nothing.
    pub async fn get(&self, session_identifier: &str) -> CoreResult<UserSession> {
        self.store
            .get_user_session_by_identifier(session_identifier)
            .await?
            .ok_or(CoreError::NotFound("user session"))
    }

    /// Refresh the session's last-accessed timestamp. Called whenever a
    /// session resumes a flow, even one later abandoned.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown session.
    pub async fn touch(&self, session_identifier: &str) -> CoreResult<UserSession> {
        let mut session = self.get(session_identifier).await?;
        session.last_accessed_unix = now_unix();
        self.store.update_user_session(&session).await?;
        Ok(session)
    }

    /// Attach a client to the session (idempotent) and bump its activity
    /// timestamps. Called on every completed authorization.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown session.
    pub async fn attach_client(
        &self,
        session_identifier: &str,
        client_id: Uuid,
    ) -> CoreResult<UserSession> {
        let mut session = self.get(session_identifier).await?;
        let now = now_unix();
        session.attach_client(client_id, now);
        session.last_accessed_unix = now;
        self.store.update_user_session(&session).await?;
        Ok(session)
    }

    /// Record a step-up: the session's ACR level and methods are raised,
    /// never lowered.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown session.
    pub async fn upgrade(
        &self,
        session_identifier: &str,
        auth_methods: &str,
        acr_level: AcrLevel,
    ) -> CoreResult<UserSession> {
        let mut session = self.get(session_identifier).await?;
        if acr_level > session.acr_level {
            session.acr_level = acr_level;
            session.auth_methods = auth_methods.to_string();
        }
        session.last_accessed_unix = now_unix();
        self.store.update_user_session(&session).await?;
        Ok(session)
    }
}
