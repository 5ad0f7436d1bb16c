//! Per-browser flow state.
//!
//! A browser cookie names a `BrowserSession`, which carries the in-flight
//! authorization context and, once the user has authenticated, the SSO
//! session identifier. Contexts are mutated only through the flow state
//! machine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::utils::generate_url_safe_token;
use crate::model::{AcrLevel, AuthMethod, CodeChallengeMethod};

const BROWSER_SESSION_ID_BYTES: usize = 32;

/// Where an authorization flow currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStage {
    /// Waiting for username/password.
    Password,
    /// Password accepted; waiting for a TOTP code.
    Otp,
    /// Authentication complete; waiting for the consent decision.
    Consent,
}

/// One in-flight `/authorize` request, parked between browser round-trips.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthContext {
    pub client_id: Uuid,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub required_acr_level: AcrLevel,
    pub stage: FlowStage,
    pub user_id: Option<Uuid>,
    pub auth_methods: Vec<AuthMethod>,
    /// Enrollment secret handed to the browser, persisted on the user only
    /// after the first valid code.
    pub pending_otp_secret: Option<String>,
}

impl AuthContext {
    /// `amr`-style space-joined method list, in completion order.
    #[must_use]
    pub fn auth_methods_joined(&self) -> String {
        self.auth_methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The ACR level the completed methods add up to.
    #[must_use]
    pub fn acr_achieved(&self) -> AcrLevel {
        if self.auth_methods.contains(&AuthMethod::Otp) {
            AcrLevel::Level2
        } else {
            AcrLevel::Level1
        }
    }

    pub fn record_method(&mut self, method: AuthMethod) {
        if !self.auth_methods.contains(&method) {
            self.auth_methods.push(method);
        }
    }
}

/// What the browser cookie points at.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BrowserSession {
    pub auth_context: Option<AuthContext>,
    pub sso_session_identifier: Option<String>,
}

struct Entry {
    session: BrowserSession,
    created_at: Instant,
}

/// TTL-bounded in-memory browser session store.
pub struct BrowserSessions {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl BrowserSessions {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh browser session id.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub async fn create(&self) -> anyhow::Result<String> {
        let id = generate_url_safe_token(BROWSER_SESSION_ID_BYTES)?;
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        entries.insert(
            id.clone(),
            Entry {
                session: BrowserSession::default(),
                created_at: Instant::now(),
            },
        );
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<BrowserSession> {
        let entries = self.entries.lock().await;
        entries
            .get(id)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .map(|entry| entry.session.clone())
    }

    /// Store a session under an existing id, refreshing its TTL.
    pub async fn put(&self, id: &str, session: BrowserSession) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        entries.insert(
            id.to_string(),
            Entry {
                session,
                created_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, id: &str) {
        self.entries.lock().await.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> AuthContext {
        AuthContext {
            client_id: Uuid::new_v4(),
            redirect_uri: "https://app.example.test/cb".to_string(),
            scope: "openid".to_string(),
            state: None,
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            required_acr_level: AcrLevel::Level1,
            stage: FlowStage::Password,
            user_id: None,
            auth_methods: vec![],
            pending_otp_secret: None,
        }
    }

    #[test]
    fn methods_join_in_completion_order() {
        let mut ctx = context();
        ctx.record_method(AuthMethod::Password);
        ctx.record_method(AuthMethod::Otp);
        ctx.record_method(AuthMethod::Password);

        assert_eq!(ctx.auth_methods_joined(), "pwd otp");
        assert_eq!(ctx.acr_achieved(), AcrLevel::Level2);
    }

    #[test]
    fn password_alone_is_level_one() {
        let mut ctx = context();
        ctx.record_method(AuthMethod::Password);
        assert_eq!(ctx.acr_achieved(), AcrLevel::Level1);
    }

    #[tokio::test]
    async fn sessions_expire_after_ttl() {
        let sessions = BrowserSessions::new(Duration::from_millis(10));
        let id = sessions.create().await.unwrap();
        assert!(sessions.get(&id).await.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sessions.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn put_overwrites_and_refreshes() {
        let sessions = BrowserSessions::new(Duration::from_secs(60));
        let id = sessions.create().await.unwrap();

        let mut session = sessions.get(&id).await.unwrap();
        session.sso_session_identifier = Some("sso-1".to_string());
        sessions.put(&id, session).await;

        let session = sessions.get(&id).await.unwrap();
        assert_eq!(session.sso_session_identifier.as_deref(), Some("sso-1"));
    }
}
