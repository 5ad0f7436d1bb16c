//! # Janua (Authentication Session & Token Issuance)
//!
//! `janua` is an OAuth2 / OpenID Connect identity provider. It drives the
//! browser-facing authorization code flow (password, TOTP step-up, consent),
//! redeems authorization codes for signed token sets, and serves identity
//! claims at the userinfo endpoint.
//!
//! ## Flows
//!
//! - **Authorization Code + PKCE:** the only browser-facing grant. Public
//!   clients must send a PKCE challenge; `S256` is verified with a constant
//!   shape, `plain` is accepted for legacy clients.
//! - **Client Credentials:** confidential clients only. The granted scope is
//!   the intersection of the request and the client's registered permissions.
//!
//! ## Sessions & Step-Up
//!
//! A successful login establishes a provider session usable for single
//! sign-on across clients. Clients registered with a higher authentication
//! class force a TOTP step, enrolling the user inline on first use.
//!
//! ## Tokens
//!
//! Access, ID, and refresh tokens are RS256 JWTs signed with the newest
//! database-held key. Rotation is additive: old keys remain resolvable by
//! `kid` so outstanding tokens stay verifiable.

pub mod api;
pub mod cli;
pub mod core;
pub mod model;
pub mod store;

pub use crate::api::GIT_COMMIT_HASH;
