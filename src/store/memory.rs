//! In-memory `Store` used by tests.
//!
//! Single-process only. Redemption holds the code map lock across the
//! whole check-and-set, which gives the same exactly-once guarantee the
//! SQL `UPDATE ... WHERE used = false` provides.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Store;
use crate::model::{AuthorizationCode, Client, KeyPair, User, UserConsent, UserSession};

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
    clients: Mutex<HashMap<Uuid, Client>>,
    codes: Mutex<HashMap<String, AuthorizationCode>>,
    keys: Mutex<HashMap<i64, KeyPair>>,
    sessions: Mutex<HashMap<String, UserSession>>,
    consents: Mutex<HashMap<(Uuid, Uuid), UserConsent>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: User) {
        self.users.lock().await.insert(user.id, user);
    }

    pub async fn add_client(&self, client: Client) {
        self.clients.lock().await.insert(client.id, client);
    }

    pub async fn add_signing_key(&self, key: KeyPair) {
        self.keys.lock().await.insert(key.id, key);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn get_user_by_subject(&self, subject: Uuid) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.subject == subject)
            .cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.users.lock().await.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_client_by_id(&self, id: Uuid) -> Result<Option<Client>> {
        Ok(self.clients.lock().await.get(&id).cloned())
    }

    async fn get_client_by_identifier(&self, identifier: &str) -> Result<Option<Client>> {
        Ok(self
            .clients
            .lock()
            .await
            .values()
            .find(|c| c.client_identifier == identifier)
            .cloned())
    }

    async fn create_code(&self, code: &AuthorizationCode) -> Result<()> {
        self.codes
            .lock()
            .await
            .insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn get_code(&self, value: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self.codes.lock().await.get(value).cloned())
    }

    async fn redeem_code(&self, value: &str) -> Result<Option<AuthorizationCode>> {
        let mut codes = self.codes.lock().await;
        match codes.get_mut(value) {
            Some(code) if !code.used => {
                code.used = true;
                Ok(Some(code.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_expired_codes(&self, now_unix: i64) -> Result<u64> {
        let mut codes = self.codes.lock().await;
        let before = codes.len();
        codes.retain(|_, code| !code.is_expired(now_unix));
        Ok((before - codes.len()) as u64)
    }

    async fn current_signing_key(&self) -> Result<Option<KeyPair>> {
        Ok(self
            .keys
            .lock()
            .await
            .values()
            .max_by_key(|k| k.id)
            .cloned())
    }

    async fn get_signing_key_by_id(&self, id: i64) -> Result<Option<KeyPair>> {
        Ok(self.keys.lock().await.get(&id).cloned())
    }

    async fn get_user_session_by_identifier(
        &self,
        session_identifier: &str,
    ) -> Result<Option<UserSession>> {
        Ok(self
            .sessions
            .lock()
            .await
            .get(session_identifier)
            .cloned())
    }

    async fn create_user_session(&self, session: &UserSession) -> Result<()> {
        self.sessions
            .lock()
            .await
            .insert(session.session_identifier.clone(), session.clone());
        Ok(())
    }

    async fn update_user_session(&self, session: &UserSession) -> Result<()> {
        self.sessions
            .lock()
            .await
            .insert(session.session_identifier.clone(), session.clone());
        Ok(())
    }

    async fn get_user_consent(
        &self,
        user_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<UserConsent>> {
        Ok(self
            .consents
            .lock()
            .await
            .get(&(user_id, client_id))
            .cloned())
    }

    async fn save_user_consent(&self, consent: &UserConsent) -> Result<()> {
        self.consents
            .lock()
            .await
            .insert((consent.user_id, consent.client_id), consent.clone());
        Ok(())
    }
}
