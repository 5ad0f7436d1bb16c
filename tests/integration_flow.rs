//! End-to-end authorization flows over the in-memory store.
//!
//! Each test drives the real flow machinery: `/authorize` semantics through
//! `AuthorizationFlow`, token exchange through `TokenValidator` plus
//! `CodeIssuer::redeem`, and verification through `TokenIssuer`.

use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use janua::core::codes::CodeIssuer;
use janua::core::config::IdpConfig;
use janua::core::context::BrowserSession;
use janua::core::error::CoreError;
use janua::core::flow::{AuthorizationFlow, AuthorizeRequest, NextStep};
use janua::core::issuer::TokenIssuer;
use janua::core::jwt;
use janua::core::keys::KeyManager;
use janua::core::otp::OtpAuthenticator;
use janua::core::password::hash_password;
use janua::core::rbac;
use janua::core::session::SessionManager;
use janua::core::testkeys;
use janua::core::validator::{TokenRequestInput, TokenValidator, ValidatedTokenRequest};
use janua::model::{AcrLevel, Client, Group, KeyPair, Permission, Role, User};
use janua::store::memory::MemoryStore;
use janua::store::Store;

// RFC 7636 appendix B test vector.
const PKCE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
const PKCE_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

struct Harness {
    store: Arc<MemoryStore>,
    flow: AuthorizationFlow,
    validator: TokenValidator,
    issuer: TokenIssuer,
    codes: CodeIssuer,
    alice_subject: Uuid,
}

fn permission(resource: &str, name: &str) -> Permission {
    Permission {
        id: Uuid::new_v4(),
        resource: resource.to_string(),
        permission: name.to_string(),
    }
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let alice_subject = Uuid::new_v4();

    store
        .add_user(User {
            id: Uuid::new_v4(),
            subject: alice_subject,
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
            id: Uuid::new_v4(),
            client_identifier: "webapp".to_string(),
            client_secret: Some("s3cret".to_string()),
            is_public: false,
            redirect_uris: vec!["https://app.example.test/cb".to_string()],
            permissions: vec![permission("api", "read")],
            allow_offline_access: false,
            required_acr_level: AcrLevel::Level1,
        })
        .await;
    store
        .add_signing_key(KeyPair {
            id: 1,
            algorithm: "RS256".to_string(),
            private_key_pem: testkeys::KEY_1_PRIVATE_PEM.to_string(),
            public_key_pem: testkeys::KEY_1_PUBLIC_PEM.to_string(),
        })
        .await;

    let dyn_store: Arc<dyn Store> = store.clone();
    let config = IdpConfig::new("https://id.example.test".to_string());
    let codes = CodeIssuer::new(dyn_store.clone(), config.code_ttl_seconds());
    let flow = AuthorizationFlow::new(
        dyn_store.clone(),
        SessionManager::new(dyn_store.clone()),
        codes.clone(),
        OtpAuthenticator::new(config.otp_issuer()),
    );
    let validator = TokenValidator::new(dyn_store.clone(), codes.clone());
    let issuer = TokenIssuer::new(KeyManager::new(dyn_store), config);

    Harness {
        store,
        flow,
        validator,
        issuer,
        codes,
        alice_subject,
    }
}

fn authorize_request() -> AuthorizeRequest {
    AuthorizeRequest {
        client_id: "webapp".to_string(),
        redirect_uri: "https://app.example.test/cb".to_string(),
        response_type: "code".to_string(),
        scope: "openid api:read".to_string(),
        state: Some("af0ifjsldkj".to_string()),
        nonce: Some("n-0S6_WzA2Mj".to_string()),
        code_challenge: Some(PKCE_CHALLENGE.to_string()),
        code_challenge_method: Some("S256".to_string()),
    }
}

/// Run the front channel to completion and return the issued code value.
async fn obtain_code(h: &Harness, browser: &mut BrowserSession) -> String {
    h.flow
        .begin(authorize_request(), browser)
        .await
        .expect("begin");
    h.flow
        .submit_password(browser, "alice", "correct horse")
        .await
        .expect("password");
    let completed = h
        .flow
        .consent_decision(browser, true)
        .await
        .expect("consent");
    let url = Url::parse(&completed.redirect_url).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .expect("code query parameter")
}

fn token_request(code: &str) -> TokenRequestInput {
    TokenRequestInput {
        grant_type: "authorization_code".to_string(),
        code: Some(code.to_string()),
        redirect_uri: Some("https://app.example.test/cb".to_string()),
        code_verifier: Some(PKCE_VERIFIER.to_string()),
        client_id: Some("webapp".to_string()),
        client_secret: Some("s3cret".to_string()),
        scope: None,
    }
}

#[tokio::test]
async fn alice_signs_in_and_exchanges_the_code() {
    let h = harness().await;
    let mut browser = BrowserSession::default();
    let code_value = obtain_code(&h, &mut browser).await;

    let validated = h.validator.validate(&token_request(&code_value)).await.unwrap();
    let ValidatedTokenRequest::AuthorizationCode { client, user, code } = validated else {
        panic!("expected an authorization_code validation");
    };
    let redeemed = h.codes.redeem(&code.code).await.unwrap();
    let response = h
        .issuer
        .generate_for_auth_code(&redeemed, &user, &client)
        .await
        .unwrap();

    assert_eq!(response.token_type, "Bearer");
    assert_eq!(response.scope, "openid api:read");
    assert!(response.id_token.is_some(), "openid grants an ID token");
    assert!(response.refresh_token.is_none(), "offline_access not granted");

    let claims = h
        .issuer
        .verify_access_token(&response.access_token)
        .await
        .unwrap();
    assert_eq!(claims.sub, h.alice_subject.to_string());
    assert_eq!(claims.aud, "webapp");
    assert_eq!(claims.iss, "https://id.example.test");
    assert_eq!(claims.permissions, vec!["api:read".to_string()]);
    assert_eq!(claims.acr.as_deref(), Some("1"));
    assert_eq!(claims.amr, Some(vec!["pwd".to_string()]));
    assert!(TokenIssuer::is_authorized_for(&claims, &["api:read"]));
    assert!(!TokenIssuer::is_authorized_for(&claims, &["api:write"]));

    // The subject resolves back to the user, as the userinfo endpoint does.
    let user = h
        .store
        .get_user_by_subject(h.alice_subject)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.username, "alice");
}

#[tokio::test]
async fn authorization_code_is_single_use() {
    let h = harness().await;
    let mut browser = BrowserSession::default();
    let code_value = obtain_code(&h, &mut browser).await;

    h.validator.validate(&token_request(&code_value)).await.unwrap();
    h.codes.redeem(&code_value).await.unwrap();

    // Replay: validation fails before any issuance.
    let replay = h.validator.validate(&token_request(&code_value)).await;
    match replay {
        Err(err @ CoreError::InvalidGrant(_)) => {
            assert_eq!(err.oauth_code(), "invalid_grant");
        }
        Err(other) => panic!("expected invalid_grant, got {other}"),
        Ok(_) => panic!("replayed code must not validate"),
    }
}

#[tokio::test]
async fn concurrent_redemption_has_exactly_one_winner() {
    let h = harness().await;
    let mut browser = BrowserSession::default();
    let code_value = obtain_code(&h, &mut browser).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let codes = h.codes.clone();
        let value = code_value.clone();
        handles.push(tokio::spawn(async move { codes.redeem(&value).await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn pkce_mismatch_does_not_burn_the_code() {
    let h = harness().await;
    let mut browser = BrowserSession::default();
    let code_value = obtain_code(&h, &mut browser).await;

    let mut bad = token_request(&code_value);
    bad.code_verifier = Some("wrong-verifier-wrong-verifier-wrong-verifier".to_string());
    assert!(matches!(
        h.validator.validate(&bad).await,
        Err(CoreError::InvalidGrant(_))
    ));

    // Validation never consumes the code, so the honest retry still works.
    h.validator.validate(&token_request(&code_value)).await.unwrap();
}

#[tokio::test]
async fn trailing_slash_redirect_uri_is_rejected_at_authorize() {
    let h = harness().await;
    let mut browser = BrowserSession::default();

    let mut request = authorize_request();
    request.redirect_uri = "https://app.example.test/cb/".to_string();
    assert!(matches!(
        h.flow.begin(request, &mut browser).await,
        Err(CoreError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn token_redirect_uri_must_match_byte_for_byte() {
    let h = harness().await;
    let mut browser = BrowserSession::default();
    let code_value = obtain_code(&h, &mut browser).await;

    let mut bad = token_request(&code_value);
    bad.redirect_uri = Some("https://app.example.test/cb/".to_string());
    assert!(matches!(
        h.validator.validate(&bad).await,
        Err(CoreError::InvalidGrant(_))
    ));
}

#[tokio::test]
async fn rotation_keeps_outstanding_tokens_verifiable() {
    let h = harness().await;
    let mut browser = BrowserSession::default();
    let code_value = obtain_code(&h, &mut browser).await;

    let validated = h.validator.validate(&token_request(&code_value)).await.unwrap();
    let ValidatedTokenRequest::AuthorizationCode { client, user, code } = validated else {
        panic!("expected an authorization_code validation");
    };
    let redeemed = h.codes.redeem(&code.code).await.unwrap();
    let old_response = h
        .issuer
        .generate_for_auth_code(&redeemed, &user, &client)
        .await
        .unwrap();

    // Rotate: a newer key becomes the signer, the old one stays resolvable.
    h.store
        .add_signing_key(KeyPair {
            id: 2,
            algorithm: "RS256".to_string(),
            private_key_pem: testkeys::KEY_2_PRIVATE_PEM.to_string(),
            public_key_pem: testkeys::KEY_2_PUBLIC_PEM.to_string(),
        })
        .await;

    let new_response = h
        .issuer
        .generate_for_client_credentials(&client_fixture(&h).await, "api:read")
        .await
        .unwrap();
    assert_eq!(
        jwt::decode_header(&new_response.access_token).unwrap().kid,
        "2"
    );
    assert_eq!(
        jwt::decode_header(&old_response.access_token).unwrap().kid,
        "1"
    );

    h.issuer
        .verify_access_token(&new_response.access_token)
        .await
        .unwrap();
    h.issuer
        .verify_access_token(&old_response.access_token)
        .await
        .unwrap();
}

async fn client_fixture(h: &Harness) -> Client {
    h.store
        .get_client_by_identifier("webapp")
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn client_credentials_narrows_to_the_intersection() {
    let h = harness().await;
    let machine_id = Uuid::new_v4();
    h.store
        .add_client(Client {
            id: machine_id,
            client_identifier: "reporter".to_string(),
            client_secret: Some("m2m-secret".to_string()),
            is_public: false,
            redirect_uris: vec![],
            permissions: vec![permission("reports", "read"), permission("reports", "write")],
            allow_offline_access: false,
            required_acr_level: AcrLevel::Level1,
        })
        .await;

    let input = TokenRequestInput {
        grant_type: "client_credentials".to_string(),
        client_id: Some("reporter".to_string()),
        client_secret: Some("m2m-secret".to_string()),
        scope: Some("reports:read billing:admin".to_string()),
        ..TokenRequestInput::default()
    };
    let validated = h.validator.validate(&input).await.unwrap();
    let ValidatedTokenRequest::ClientCredentials { client, scope } = validated else {
        panic!("expected a client_credentials validation");
    };
    assert_eq!(scope, "reports:read");

    let response = h
        .issuer
        .generate_for_client_credentials(&client, &scope)
        .await
        .unwrap();
    let claims = h
        .issuer
        .verify_access_token(&response.access_token)
        .await
        .unwrap();
    assert_eq!(claims.sub, "reporter");
    assert_eq!(claims.acr, None);
    assert_eq!(claims.amr, None);

    // Nothing in common with the client's permissions: invalid_scope.
    let mut outside = input.clone();
    outside.scope = Some("billing:admin".to_string());
    match h.validator.validate(&outside).await {
        Err(err @ CoreError::InvalidScope(_)) => {
            assert_eq!(err.oauth_code(), "invalid_scope");
        }
        Err(other) => panic!("expected invalid_scope, got {other}"),
        Ok(_) => panic!("out-of-bounds scope must not validate"),
    }

    // No scope requested at all: everything the client holds, sorted.
    let mut everything = input;
    everything.scope = None;
    let validated = h.validator.validate(&everything).await.unwrap();
    let ValidatedTokenRequest::ClientCredentials { scope, .. } = validated else {
        panic!("expected a client_credentials validation");
    };
    assert_eq!(scope, "reports:read reports:write");
}

#[tokio::test]
async fn public_clients_cannot_use_client_credentials() {
    let h = harness().await;
    h.store
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

    let input = TokenRequestInput {
        grant_type: "client_credentials".to_string(),
        client_id: Some("spa".to_string()),
        scope: Some("api:read".to_string()),
        ..TokenRequestInput::default()
    };
    assert!(matches!(
        h.validator.validate(&input).await,
        Err(CoreError::InvalidClient(_))
    ));
}

#[test]
fn rbac_resolution_ignores_assignment_order() {
    let reports = permission("reports", "read");
    let billing = permission("billing", "read");
    let audit = permission("audit", "read");

    let role = Role {
        id: Uuid::new_v4(),
        name: "analyst".to_string(),
        permissions: vec![billing.clone()],
    };
    let group = Group {
        id: Uuid::new_v4(),
        name: "finance".to_string(),
        roles: vec![role.clone()],
        permissions: vec![audit.clone()],
    };

    let base = User {
        id: Uuid::new_v4(),
        subject: Uuid::new_v4(),
        username: "alice".to_string(),
        email: "alice@example.test".to_string(),
        password_hash: "x".to_string(),
        otp_secret: None,
        roles: vec![role.clone()],
        groups: vec![group.clone()],
        permissions: vec![reports.clone()],
    };

    let mut reordered = base.clone();
    reordered.permissions = vec![reports];
    reordered.roles = vec![];
    reordered.groups = vec![
        Group {
            id: Uuid::new_v4(),
            name: "finance-alt".to_string(),
            roles: vec![role],
            permissions: vec![audit, billing],
        },
        group,
    ];

    assert_eq!(
        rbac::effective_permissions(&base),
        rbac::effective_permissions(&reordered)
    );
    assert_eq!(
        rbac::filter_scope_for_user("reports:read billing:read openid", &base),
        "reports:read billing:read openid"
    );
}

#[tokio::test]
async fn second_client_reuses_the_sso_session() {
    let h = harness().await;
    h.store
        .add_client(Client {
            id: Uuid::new_v4(),
            client_identifier: "wiki".to_string(),
            client_secret: Some("wiki-secret".to_string()),
            is_public: false,
            redirect_uris: vec!["https://wiki.example.test/cb".to_string()],
            permissions: vec![permission("api", "read")],
            allow_offline_access: false,
            required_acr_level: AcrLevel::Level1,
        })
        .await;

    let mut browser = BrowserSession::default();
    obtain_code(&h, &mut browser).await;
    assert!(browser.sso_session_identifier.is_some());

    let step = h
        .flow
        .begin(
            AuthorizeRequest {
                client_id: "wiki".to_string(),
                redirect_uri: "https://wiki.example.test/cb".to_string(),
                ..authorize_request()
            },
            &mut browser,
        )
        .await
        .unwrap();

    // Credentials are skipped; the flow resumes at consent.
    assert!(matches!(step, NextStep::Consent { .. }));
    let completed = h.flow.consent_decision(&mut browser, true).await.unwrap();
    assert!(completed.redirect_url.starts_with("https://wiki.example.test/cb"));
}
