//! Entities shared by the core and the storage layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Authentication method completed during a flow. Values follow the OIDC
/// `amr` claim vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    Password,
    Otp,
}

impl AuthMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Password => "pwd",
            Self::Otp => "otp",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication Context Class Reference level.
///
/// Level 1 is password only; level 2 is password plus OTP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AcrLevel {
    Level1,
    Level2,
}

impl AcrLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Level1 => "1",
            Self::Level2 => "2",
        }
    }

    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Level1 => 1,
            Self::Level2 => 2,
        }
    }

    #[must_use]
    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Level1),
            2 => Some(Self::Level2),
            _ => None,
        }
    }
}

impl fmt::Display for AcrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PKCE code challenge method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    Plain,
    S256,
}

impl CodeChallengeMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            _ => Err(()),
        }
    }
}

/// A single grantable permission, scoped to a resource.
///
/// The scope token form is `resource:permission`, e.g. `api:read`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub resource: String,
    pub permission: String,
}

impl Permission {
    #[must_use]
    pub fn scope_token(&self) -> String {
        format!("{}:{}", self.resource, self.permission)
    }
}

/// A named set of permissions assignable to users directly or via groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<Permission>,
}

/// A group of users carrying roles and direct permissions of its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

/// An end user. The subject identifier is opaque and immutable once
/// assigned; the password is only ever stored as an argon2 hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub subject: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    /// Base32 TOTP secret. `None` until the user completes OTP enrollment.
    pub otp_secret: Option<String>,
    pub roles: Vec<Role>,
    pub groups: Vec<Group>,
    pub permissions: Vec<Permission>,
}

impl User {
    #[must_use]
    pub fn otp_enrolled(&self) -> bool {
        self.otp_secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A relying party. Read-only to the core during a token flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub client_identifier: String,
    /// `None` for public clients.
    pub client_secret: Option<String>,
    pub is_public: bool,
    pub redirect_uris: Vec<String>,
    /// Maximum scope the client may request.
    pub permissions: Vec<Permission>,
    /// Whether the client may request `offline_access` (refresh tokens).
    pub allow_offline_access: bool,
    /// ACR level this client requires its users to reach.
    pub required_acr_level: AcrLevel,
}

impl Client {
    #[must_use]
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        // Byte-for-byte comparison; trailing-slash variants do not match.
        self.redirect_uris.iter().any(|u| u == uri)
    }
}

/// One in-flight authorization grant.
///
/// A code may be redeemed at most once: redemption is an atomic check-and-set
/// of `used` performed by the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub id: Uuid,
    pub code: String,
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub scope: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub nonce: Option<String>,
    pub acr_level: AcrLevel,
    /// Space-joined ordered list of completed methods, e.g. `"pwd otp"`.
    pub auth_methods: String,
    pub session_identifier: String,
    pub used: bool,
    pub created_at_unix: i64,
    pub expires_at_unix: i64,
}

impl AuthorizationCode {
    #[must_use]
    pub fn is_expired(&self, now_unix: i64) -> bool {
        now_unix >= self.expires_at_unix
    }
}

/// A client attached to an SSO session, with its own activity timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClient {
    pub client_id: Uuid,
    pub last_accessed_unix: i64,
}

/// The SSO session: one authenticated browser serving many clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSession {
    pub id: Uuid,
    /// Unguessable identifier, independent of any cookie value.
    pub session_identifier: String,
    pub user_id: Uuid,
    pub auth_methods: String,
    pub acr_level: AcrLevel,
    pub started_at_unix: i64,
    pub last_accessed_unix: i64,
    pub clients: Vec<SessionClient>,
}

impl UserSession {
    /// Attach a client or refresh its timestamp. Idempotent.
    pub fn attach_client(&mut self, client_id: Uuid, now_unix: i64) {
        if let Some(attached) = self.clients.iter_mut().find(|c| c.client_id == client_id) {
            attached.last_accessed_unix = now_unix;
        } else {
            self.clients.push(SessionClient {
                client_id,
                last_accessed_unix: now_unix,
            });
        }
    }
}

/// Durable record that a user approved a client for a scope set.
/// Unique per (user, client); re-consent overwrites the scope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConsent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub scope: String,
    pub granted_at_unix: i64,
}

/// An asymmetric signing key. Immutable once created; the key with the
/// highest identifier is the current signer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyPair {
    pub id: i64,
    pub algorithm: String,
    pub private_key_pem: String,
    pub public_key_pem: String,
}

impl KeyPair {
    /// String form used as the JWT `kid` header.
    #[must_use]
    pub fn kid(&self) -> String {
        self.id.to_string()
    }
}
