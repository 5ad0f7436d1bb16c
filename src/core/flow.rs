//! Authorization flow state machine.
//!
//! Drives one authorization request from the initial redirect through
//! password check, optional TOTP step-up, consent, and code issuance.
//! All state between browser round-trips lives in the `AuthContext`
//! parked on the browser session; nothing here touches cookies.

use std::str::FromStr;
use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use super::codes::{CodeIssuer, IssueCodeParams};
use super::context::{AuthContext, BrowserSession, FlowStage};
use super::error::{CoreError, CoreResult};
use super::otp::{OtpAuthenticator, OtpEnrollment};
use super::password::verify_password;
use super::rbac;
use super::session::SessionManager;
use super::utils::now_unix;
use crate::model::{AcrLevel, AuthMethod, Client, CodeChallengeMethod, User, UserConsent};
use crate::store::Store;

/// Query parameters of an incoming `/authorize` request.
#[derive(Clone, Debug)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: String,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// What the browser should be shown next.
pub enum NextStep {
    /// Prompt for username and password.
    Password,
    /// Prompt for a TOTP code; `enrollment` carries QR material when the
    /// user has no secret yet.
    Otp { enrollment: Option<OtpEnrollment> },
    /// Show the consent screen, or skip it when prior consent covers the
    /// requested scope.
    Consent {
        scope: String,
        consent_required: bool,
    },
}

/// Terminal outcome: where to send the browser.
pub struct CompletedAuthorization {
    pub redirect_url: String,
}

#[derive(Clone)]
pub struct AuthorizationFlow {
    store: Arc<dyn Store>,
    sessions: SessionManager,
    codes: CodeIssuer,
    otp: OtpAuthenticator,
}

impl AuthorizationFlow {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        sessions: SessionManager,
        codes: CodeIssuer,
        otp: OtpAuthenticator,
    ) -> Self {
        Self {
            store,
            sessions,
            codes,
            otp,
        }
    }

    /// Start a flow: validate the request, park an `AuthContext` on the
    /// browser session, and decide the first prompt. A live SSO session at
    /// a sufficient ACR level skips straight to consent.
    ///
    /// # Errors
    /// Returns `InvalidRequest` when any request check fails. The caller
    /// must not redirect to the supplied URI on error.
    pub async fn begin(
        &self,
        request: AuthorizeRequest,
        browser: &mut BrowserSession,
    ) -> CoreResult<NextStep> {
        if request.response_type != "code" {
            return Err(CoreError::InvalidRequest(
                "response_type must be code".to_string(),
            ));
        }

        let client = self
            .store
            .get_client_by_identifier(&request.client_id)
            .await?
            .ok_or_else(|| CoreError::InvalidRequest("unknown client_id".to_string()))?;

        if !client.has_redirect_uri(&request.redirect_uri) {
            return Err(CoreError::InvalidRequest(
                "redirect_uri is not registered for this client".to_string(),
            ));
        }

        validate_requested_scope(&request.scope, &client)?;

        let (code_challenge, code_challenge_method) =
            validate_pkce_params(&request, client.is_public)?;

        let mut context = AuthContext {
            client_id: client.id,
            redirect_uri: request.redirect_uri,
            scope: request.scope,
            state: request.state,
            nonce: request.nonce,
            code_challenge,
            code_challenge_method,
            required_acr_level: client.required_acr_level,
            stage: FlowStage::Password,
            user_id: None,
            auth_methods: Vec::new(),
            pending_otp_secret: None,
        };

        // SSO: an existing session at a sufficient level skips credentials.
        let step = match self.resume_from_sso(browser, &mut context).await? {
            Some(step) => step,
            None => NextStep::Password,
        };

        browser.auth_context = Some(context);
        Ok(step)
    }

    async fn resume_from_sso(
        &self,
        browser: &BrowserSession,
        context: &mut AuthContext,
    ) -> CoreResult<Option<NextStep>> {
        let Some(identifier) = browser.sso_session_identifier.as_deref() else {
            return Ok(None);
        };
        let Ok(session) = self.sessions.get(identifier).await else {
            return Ok(None);
        };
        if session.acr_level < context.required_acr_level {
            return Ok(None);
        }

        // The resume counts as session activity even if the user never
        // finishes consent.
        let session = self.sessions.touch(identifier).await?;

        context.user_id = Some(session.user_id);
        for token in session.auth_methods.split_whitespace() {
            match token {
                "pwd" => context.record_method(AuthMethod::Password),
                "otp" => context.record_method(AuthMethod::Otp),
                _ => {}
            }
        }
        context.stage = FlowStage::Consent;

        let consent_required = !self
            .consent_covers(session.user_id, context.client_id, &context.scope)
            .await?;
        Ok(Some(NextStep::Consent {
            scope: context.scope.clone(),
            consent_required,
        }))
    }

    /// Check the primary credential and move to OTP or consent.
    ///
    /// # Errors
    /// Returns `IncorrectCredentials` on a bad username or password (the
    /// attempt is retried), `InvalidRequest` when no flow is pending.
    pub async fn submit_password(
        &self,
        browser: &mut BrowserSession,
        username: &str,
        password: &str,
    ) -> CoreResult<NextStep> {
        let context = pending_context(browser, FlowStage::Password)?;

        let user = self
            .lookup_user(username)
            .await?
            .ok_or(CoreError::IncorrectCredentials)?;
        verify_password(password, &user.password_hash)?;

        context.user_id = Some(user.id);
        context.record_method(AuthMethod::Password);

        if context.required_acr_level >= AcrLevel::Level2 {
            context.stage = FlowStage::Otp;
            if user.otp_enrolled() {
                return Ok(NextStep::Otp { enrollment: None });
            }
            let enrollment = self.otp.begin_enrollment(&user.email)?;
            context.pending_otp_secret = Some(enrollment.secret_base32.clone());
            return Ok(NextStep::Otp {
                enrollment: Some(enrollment),
            });
        }

        context.stage = FlowStage::Consent;
        let consent_required = !self
            .consent_covers(user.id, context.client_id, &context.scope)
            .await?;
        Ok(NextStep::Consent {
            scope: context.scope.clone(),
            consent_required,
        })
    }

    /// Re-serve the OTP prompt for a flow parked at the OTP stage, so a
    /// browser that lost the login response can fetch the QR again. A
    /// pending enrollment keeps its secret, which keeps an already-scanned
    /// QR valid; an unenrolled user with no pending secret gets a fresh one.
    ///
    /// # Errors
    /// Returns `InvalidRequest` when the flow is not waiting for OTP.
    pub async fn otp_prompt(&self, browser: &mut BrowserSession) -> CoreResult<NextStep> {
        let context = pending_context(browser, FlowStage::Otp)?;
        let user_id = context
            .user_id
            .ok_or_else(|| CoreError::InvalidRequest("no authenticated user".to_string()))?;
        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(CoreError::NotFound("user"))?;

        if let Some(pending) = context.pending_otp_secret.clone() {
            let enrollment = self.otp.enrollment_material(&pending, &user.email)?;
            return Ok(NextStep::Otp {
                enrollment: Some(enrollment),
            });
        }
        if user.otp_enrolled() {
            return Ok(NextStep::Otp { enrollment: None });
        }

        let enrollment = self.otp.begin_enrollment(&user.email)?;
        context.pending_otp_secret = Some(enrollment.secret_base32.clone());
        Ok(NextStep::Otp {
            enrollment: Some(enrollment),
        })
    }

    /// Check a TOTP code. On the enrollment path the first valid code
    /// makes the secret permanent on the user record.
    ///
    /// # Errors
    /// Returns `IncorrectOtp` on a wrong code (retried), `InvalidRequest`
    /// when the flow is not waiting for OTP.
    pub async fn submit_otp(
        &self,
        browser: &mut BrowserSession,
        code: &str,
    ) -> CoreResult<NextStep> {
        let context = pending_context(browser, FlowStage::Otp)?;
        let user_id = context
            .user_id
            .ok_or_else(|| CoreError::InvalidRequest("no authenticated user".to_string()))?;
        let mut user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(CoreError::NotFound("user"))?;

        if let Some(pending) = context.pending_otp_secret.clone() {
            self.otp.validate(&pending, &user.email, code)?;
            user.otp_secret = Some(pending);
            self.store.update_user(&user).await?;
            context.pending_otp_secret = None;
        } else {
            let secret = user
                .otp_secret
                .as_deref()
                .ok_or_else(|| CoreError::InvalidRequest("user has no OTP secret".to_string()))?;
            self.otp.validate(secret, &user.email, code)?;
        }

        context.record_method(AuthMethod::Otp);
        context.stage = FlowStage::Consent;
        let consent_required = !self
            .consent_covers(user.id, context.client_id, &context.scope)
            .await?;
        Ok(NextStep::Consent {
            scope: context.scope.clone(),
            consent_required,
        })
    }

    /// Apply the consent decision and finish the flow.
    ///
    /// Approval persists consent, fans the client out onto the SSO session
    /// (creating one if needed), issues the code, and builds the final
    /// redirect. Denial builds an `error=access_denied` redirect. Either
    /// way the auth context is discarded.
    ///
    /// # Errors
    /// Returns `InvalidRequest` when the flow is not at the consent stage.
    pub async fn consent_decision(
        &self,
        browser: &mut BrowserSession,
        approved: bool,
    ) -> CoreResult<CompletedAuthorization> {
        let context = pending_context(browser, FlowStage::Consent)?.clone();
        let user_id = context
            .user_id
            .ok_or_else(|| CoreError::InvalidRequest("no authenticated user".to_string()))?;

        if !approved {
            browser.auth_context = None;
            let redirect_url = error_redirect(
                &context.redirect_uri,
                "access_denied",
                "the user denied the request",
                context.state.as_deref(),
            )?;
            return Ok(CompletedAuthorization { redirect_url });
        }

        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(CoreError::NotFound("user"))?;

        self.store
            .save_user_consent(&UserConsent {
                id: Uuid::new_v4(),
                user_id,
                client_id: context.client_id,
                scope: context.scope.clone(),
                granted_at_unix: now_unix(),
            })
            .await?;

        let auth_methods = context.auth_methods_joined();
        let acr_level = context.acr_achieved();

        let session = match browser.sso_session_identifier.as_deref() {
            Some(identifier) if self.sessions.get(identifier).await.is_ok() => {
                self.sessions
                    .upgrade(identifier, &auth_methods, acr_level)
                    .await?
            }
            _ => self.sessions.establish(&user, &auth_methods, acr_level).await?,
        };
        let session = self
            .sessions
            .attach_client(&session.session_identifier, context.client_id)
            .await?;
        browser.sso_session_identifier = Some(session.session_identifier.clone());

        // The code carries only what the user actually holds.
        let granted_scope = rbac::filter_scope_for_user(&context.scope, &user);
        let code = self
            .codes
            .issue(IssueCodeParams {
                user_id,
                client_id: context.client_id,
                scope: granted_scope,
                redirect_uri: context.redirect_uri.clone(),
                code_challenge: context.code_challenge.clone(),
                code_challenge_method: context.code_challenge_method,
                nonce: context.nonce.clone(),
                acr_level: session.acr_level,
                auth_methods: session.auth_methods.clone(),
                session_identifier: session.session_identifier.clone(),
            })
            .await?;

        browser.auth_context = None;

        let mut url = Url::parse(&context.redirect_uri)
            .map_err(|e| CoreError::InvalidRequest(format!("invalid redirect_uri: {e}")))?;
        url.query_pairs_mut().append_pair("code", &code.code);
        if let Some(state) = context.state.as_deref() {
            url.query_pairs_mut().append_pair("state", state);
        }
        Ok(CompletedAuthorization {
            redirect_url: url.to_string(),
        })
    }

    async fn lookup_user(&self, username_or_email: &str) -> CoreResult<Option<User>> {
        if let Some(user) = self.store.get_user_by_username(username_or_email).await? {
            return Ok(Some(user));
        }
        Ok(self.store.get_user_by_email(username_or_email).await?)
    }

    async fn consent_covers(
        &self,
        user_id: Uuid,
        client_id: Uuid,
        scope: &str,
    ) -> CoreResult<bool> {
        let Some(consent) = self.store.get_user_consent(user_id, client_id).await? else {
            return Ok(false);
        };
        let granted: std::collections::BTreeSet<&str> =
            consent.scope.split_whitespace().collect();
        Ok(scope.split_whitespace().all(|token| granted.contains(token)))
    }
}

fn pending_context(
    browser: &mut BrowserSession,
    expected: FlowStage,
) -> CoreResult<&mut AuthContext> {
    let context = browser
        .auth_context
        .as_mut()
        .ok_or_else(|| CoreError::InvalidRequest("no authorization flow in progress".to_string()))?;
    if context.stage != expected {
        return Err(CoreError::InvalidRequest(
            "request does not match the current flow stage".to_string(),
        ));
    }
    Ok(context)
}

fn validate_requested_scope(scope: &str, client: &Client) -> CoreResult<()> {
    if scope.trim().is_empty() {
        return Err(CoreError::InvalidRequest("scope is required".to_string()));
    }
    let allowed = rbac::client_permissions(client);
    for token in scope.split_whitespace() {
        if token == "offline_access" {
            if !client.allow_offline_access {
                return Err(CoreError::InvalidRequest(
                    "client may not request offline_access".to_string(),
                ));
            }
            continue;
        }
        if rbac::is_non_resource_scope(token) {
            continue;
        }
        if !allowed.contains(token) {
            return Err(CoreError::InvalidRequest(format!(
                "scope {token} exceeds the client's permissions"
            )));
        }
    }
    Ok(())
}

fn validate_pkce_params(
    request: &AuthorizeRequest,
    client_is_public: bool,
) -> CoreResult<(Option<String>, Option<CodeChallengeMethod>)> {
    match (&request.code_challenge, &request.code_challenge_method) {
        (None, None) => {
            if client_is_public {
                return Err(CoreError::InvalidRequest(
                    "public clients must use PKCE".to_string(),
                ));
            }
            Ok((None, None))
        }
        (None, Some(_)) => Err(CoreError::InvalidRequest(
            "code_challenge_method without code_challenge".to_string(),
        )),
        (Some(challenge), method) => {
            // RFC 7636: method defaults to plain when omitted.
            let method = match method.as_deref() {
                None => CodeChallengeMethod::Plain,
                Some(raw) => CodeChallengeMethod::from_str(raw).map_err(|()| {
                    CoreError::InvalidRequest(format!(
                        "unsupported code_challenge_method: {raw}"
                    ))
                })?,
            };
            Ok((Some(challenge.clone()), Some(method)))
        }
    }
}

fn error_redirect(
    redirect_uri: &str,
    error: &str,
    description: &str,
    state: Option<&str>,
) -> CoreResult<String> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| CoreError::InvalidRequest(format!("invalid redirect_uri: {e}")))?;
    url.query_pairs_mut()
        .append_pair("error", error)
        .append_pair("error_description", description);
    if let Some(state) = state {
        url.query_pairs_mut().append_pair("state", state);
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::IdpConfig;
    use crate::core::password::hash_password;
    use crate::core::pkce::s256_challenge;
    use crate::model::{Permission, UserSession};
    use crate::store::memory::MemoryStore;

    fn permission(resource: &str, name: &str) -> Permission {
        Permission {
            id: Uuid::new_v4(),
            resource: resource.to_string(),
            permission: name.to_string(),
        }
    }

    async fn store_with_fixtures(required_acr: AcrLevel) -> (Arc<MemoryStore>, Uuid, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        store
            .add_user(User {
                id: user_id,
                subject: Uuid::new_v4(),
                username: "alice".to_string(),
                email: "alice@example.test".to_string(),
                password_hash: hash_password("correct horse").unwrap(),
                otp_secret: None,
                roles: vec![],
                groups: vec![],
                permissions: vec![permission("api", "read")],
            })
            .await;
        store
            .add_client(Client {
                id: client_id,
                client_identifier: "webapp".to_string(),
                client_secret: Some("s3cret".to_string()),
                is_public: false,
                redirect_uris: vec!["https://app.example.test/cb".to_string()],
                permissions: vec![permission("api", "read")],
                allow_offline_access: false,
                required_acr_level: required_acr,
            })
            .await;
        (store, user_id, client_id)
    }

    fn flow(store: Arc<MemoryStore>) -> AuthorizationFlow {
        let store: Arc<dyn Store> = store;
        let config = IdpConfig::new("https://id.example.test".to_string());
        AuthorizationFlow::new(
            store.clone(),
            SessionManager::new(store.clone()),
            CodeIssuer::new(store, config.code_ttl_seconds()),
            OtpAuthenticator::new(config.otp_issuer()),
        )
    }

    fn request() -> AuthorizeRequest {
        AuthorizeRequest {
            client_id: "webapp".to_string(),
            redirect_uri: "https://app.example.test/cb".to_string(),
            response_type: "code".to_string(),
            scope: "api:read".to_string(),
            state: Some("xyz".to_string()),
            nonce: Some("n-1".to_string()),
            code_challenge: Some(s256_challenge("verifier-value")),
            code_challenge_method: Some("S256".to_string()),
        }
    }

    #[tokio::test]
    async fn password_then_consent_issues_a_code() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level1).await;
        let flow = flow(store.clone());
        let mut browser = BrowserSession::default();

        assert!(matches!(
            flow.begin(request(), &mut browser).await.unwrap(),
            NextStep::Password
        ));

        let step = flow
            .submit_password(&mut browser, "alice", "correct horse")
            .await
            .unwrap();
        assert!(matches!(
            step,
            NextStep::Consent {
                consent_required: true,
                ..
            }
        ));

        let completed = flow.consent_decision(&mut browser, true).await.unwrap();
        let url = Url::parse(&completed.redirect_url).unwrap();
        let code_value = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.to_string())
            .unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "state" && v == "xyz"));

        let code = store.get_code(&code_value).await.unwrap().unwrap();
        assert_eq!(code.scope, "api:read");
        assert_eq!(code.auth_methods, "pwd");
        assert_eq!(code.acr_level, AcrLevel::Level1);
        assert!(browser.auth_context.is_none());
        assert!(browser.sso_session_identifier.is_some());
    }

    #[tokio::test]
    async fn wrong_password_is_retryable() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level1).await;
        let flow = flow(store);
        let mut browser = BrowserSession::default();
        flow.begin(request(), &mut browser).await.unwrap();

        let result = flow.submit_password(&mut browser, "alice", "wrong").await;
        assert!(matches!(result, Err(CoreError::IncorrectCredentials)));

        // The flow is still at the password stage; a correct retry works.
        flow.submit_password(&mut browser, "alice", "correct horse")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn level_two_routes_through_otp_enrollment() {
        let (store, user_id, _) = store_with_fixtures(AcrLevel::Level2).await;
        let flow = flow(store.clone());
        let mut browser = BrowserSession::default();
        flow.begin(request(), &mut browser).await.unwrap();

        let step = flow
            .submit_password(&mut browser, "alice", "correct horse")
            .await
            .unwrap();
        let NextStep::Otp {
            enrollment: Some(enrollment),
        } = step
        else {
            panic!("expected OTP enrollment");
        };

        // Wrong code first: retried, secret not persisted.
        assert!(matches!(
            flow.submit_otp(&mut browser, "000000").await,
            Err(CoreError::IncorrectOtp)
        ));
        let user = store.get_user_by_id(user_id).await.unwrap().unwrap();
        assert!(!user.otp_enrolled());

        let code = current_totp_code(&enrollment.secret_base32);
        flow.submit_otp(&mut browser, &code).await.unwrap();

        let user = store.get_user_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.otp_secret.as_deref(), Some(enrollment.secret_base32.as_str()));

        let completed = flow.consent_decision(&mut browser, true).await.unwrap();
        let url = Url::parse(&completed.redirect_url).unwrap();
        let code_value = url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.to_string())
            .unwrap();
        let issued = store.get_code(&code_value).await.unwrap().unwrap();
        assert_eq!(issued.auth_methods, "pwd otp");
        assert_eq!(issued.acr_level, AcrLevel::Level2);
    }

    #[tokio::test]
    async fn enrollment_prompt_can_be_refetched() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level2).await;
        let flow = flow(store);
        let mut browser = BrowserSession::default();
        flow.begin(request(), &mut browser).await.unwrap();

        let step = flow
            .submit_password(&mut browser, "alice", "correct horse")
            .await
            .unwrap();
        let NextStep::Otp {
            enrollment: Some(first),
        } = step
        else {
            panic!("expected OTP enrollment");
        };

        // A second fetch serves the same secret, so a scanned QR stays valid.
        let step = flow.otp_prompt(&mut browser).await.unwrap();
        let NextStep::Otp {
            enrollment: Some(again),
        } = step
        else {
            panic!("expected OTP enrollment");
        };
        assert_eq!(again.secret_base32, first.secret_base32);

        let code = current_totp_code(&first.secret_base32);
        flow.submit_otp(&mut browser, &code).await.unwrap();
    }

    #[tokio::test]
    async fn enrolled_user_prompt_carries_no_secret() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level2).await;
        let flow = flow(store);

        // First flow enrolls the authenticator.
        let mut browser = BrowserSession::default();
        flow.begin(request(), &mut browser).await.unwrap();
        let step = flow
            .submit_password(&mut browser, "alice", "correct horse")
            .await
            .unwrap();
        let NextStep::Otp {
            enrollment: Some(enrollment),
        } = step
        else {
            panic!("expected OTP enrollment");
        };
        let code = current_totp_code(&enrollment.secret_base32);
        flow.submit_otp(&mut browser, &code).await.unwrap();

        // A later flow from a fresh browser only asks for the code.
        let mut second = BrowserSession::default();
        flow.begin(request(), &mut second).await.unwrap();
        flow.submit_password(&mut second, "alice", "correct horse")
            .await
            .unwrap();
        let step = flow.otp_prompt(&mut second).await.unwrap();
        assert!(matches!(step, NextStep::Otp { enrollment: None }));
    }

    #[tokio::test]
    async fn sso_resume_refreshes_session_activity() {
        let (store, user_id, _) = store_with_fixtures(AcrLevel::Level1).await;
        let stale = UserSession {
            id: Uuid::new_v4(),
            session_identifier: "sso-stale".to_string(),
            user_id,
            auth_methods: "pwd".to_string(),
            acr_level: AcrLevel::Level1,
            started_at_unix: 5,
            last_accessed_unix: 5,
            clients: Vec::new(),
        };
        store.create_user_session(&stale).await.unwrap();

        let flow = flow(store.clone());
        let mut browser = BrowserSession {
            auth_context: None,
            sso_session_identifier: Some("sso-stale".to_string()),
        };
        let step = flow.begin(request(), &mut browser).await.unwrap();
        assert!(matches!(step, NextStep::Consent { .. }));

        // Resumed but abandoned at consent: the timestamp is still bumped.
        let session = store
            .get_user_session_by_identifier("sso-stale")
            .await
            .unwrap()
            .unwrap();
        assert!(session.last_accessed_unix > 5);
    }

    #[tokio::test]
    async fn denial_redirects_with_access_denied() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level1).await;
        let flow = flow(store);
        let mut browser = BrowserSession::default();
        flow.begin(request(), &mut browser).await.unwrap();
        flow.submit_password(&mut browser, "alice", "correct horse")
            .await
            .unwrap();

        let completed = flow.consent_decision(&mut browser, false).await.unwrap();
        let url = Url::parse(&completed.redirect_url).unwrap();
        assert!(url
            .query_pairs()
            .any(|(k, v)| k == "error" && v == "access_denied"));
        assert!(url.query_pairs().any(|(k, v)| k == "state" && v == "xyz"));
        assert!(browser.auth_context.is_none());
    }

    #[tokio::test]
    async fn sso_session_skips_credentials_for_second_client() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level1).await;
        store
            .add_client(Client {
                id: Uuid::new_v4(),
                client_identifier: "secondapp".to_string(),
                client_secret: Some("other".to_string()),
                is_public: false,
                redirect_uris: vec!["https://second.example.test/cb".to_string()],
                permissions: vec![permission("api", "read")],
                allow_offline_access: false,
                required_acr_level: AcrLevel::Level1,
            })
            .await;
        let flow = flow(store.clone());
        let mut browser = BrowserSession::default();

        flow.begin(request(), &mut browser).await.unwrap();
        flow.submit_password(&mut browser, "alice", "correct horse")
            .await
            .unwrap();
        flow.consent_decision(&mut browser, true).await.unwrap();
        let sso = browser.sso_session_identifier.clone().unwrap();

        let step = flow
            .begin(
                AuthorizeRequest {
                    client_id: "secondapp".to_string(),
                    redirect_uri: "https://second.example.test/cb".to_string(),
                    ..request()
                },
                &mut browser,
            )
            .await
            .unwrap();
        assert!(matches!(step, NextStep::Consent { .. }));

        flow.consent_decision(&mut browser, true).await.unwrap();
        let session = store
            .get_user_session_by_identifier(&sso)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.clients.len(), 2);
    }

    #[tokio::test]
    async fn prior_consent_covering_scope_skips_the_prompt() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level1).await;
        let flow = flow(store);
        let mut browser = BrowserSession::default();

        flow.begin(request(), &mut browser).await.unwrap();
        flow.submit_password(&mut browser, "alice", "correct horse")
            .await
            .unwrap();
        flow.consent_decision(&mut browser, true).await.unwrap();

        // Same client, same scope, fresh browser: consent is already on file.
        let mut second_browser = BrowserSession::default();
        flow.begin(request(), &mut second_browser).await.unwrap();
        let step = flow
            .submit_password(&mut second_browser, "alice", "correct horse")
            .await
            .unwrap();
        assert!(matches!(
            step,
            NextStep::Consent {
                consent_required: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn begin_rejects_bad_requests() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level1).await;
        let flow = flow(store);
        let mut browser = BrowserSession::default();

        let mut bad = request();
        bad.redirect_uri = "https://app.example.test/cb/".to_string();
        assert!(matches!(
            flow.begin(bad, &mut browser).await,
            Err(CoreError::InvalidRequest(_))
        ));

        let mut bad = request();
        bad.scope = "api:write".to_string();
        assert!(matches!(
            flow.begin(bad, &mut browser).await,
            Err(CoreError::InvalidRequest(_))
        ));

        let mut bad = request();
        bad.client_id = "ghost".to_string();
        assert!(matches!(
            flow.begin(bad, &mut browser).await,
            Err(CoreError::InvalidRequest(_))
        ));

        let mut bad = request();
        bad.scope = "api:read offline_access".to_string();
        assert!(matches!(
            flow.begin(bad, &mut browser).await,
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn public_client_must_send_pkce() {
        let (store, _, _) = store_with_fixtures(AcrLevel::Level1).await;
        store
            .add_client(Client {
                id: Uuid::new_v4(),
                client_identifier: "spa".to_string(),
                client_secret: None,
                is_public: true,
                redirect_uris: vec!["https://spa.example.test/cb".to_string()],
                permissions: vec![permission("api", "read")],
                allow_offline_access: false,
                required_acr_level: AcrLevel::Level1,
            })
            .await;
        let flow = flow(store);
        let mut browser = BrowserSession::default();

        let bad = AuthorizeRequest {
            client_id: "spa".to_string(),
            redirect_uri: "https://spa.example.test/cb".to_string(),
            code_challenge: None,
            code_challenge_method: None,
            ..request()
        };
        assert!(matches!(
            flow.begin(bad, &mut browser).await,
            Err(CoreError::InvalidRequest(_))
        ));
    }

    fn current_totp_code(secret_base32: &str) -> String {
        use totp_rs::{Algorithm, Secret, TOTP};
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap(),
            Some("janua".to_string()),
            "alice@example.test".to_string(),
        )
        .unwrap();
        totp.generate_current().unwrap()
    }
}
