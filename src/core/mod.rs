//! The authentication-session and token-issuance engine.

pub mod codes;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod issuer;
pub mod jwt;
pub mod keys;
pub mod otp;
pub mod password;
pub mod pkce;
pub mod rbac;
pub mod session;
pub mod utils;
pub mod validator;

#[doc(hidden)]
pub mod testkeys;
