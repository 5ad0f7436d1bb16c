//! RS256 JWT encoding and verification.
//!
//! Claims structs are defined by the issuer; this module only handles the
//! compact serialization, the signature, and the `kid` header. Claim-level
//! validation (`iss`, `aud`, `exp`) belongs to the caller, which knows the
//! expected values.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{errors::Error as RsaError, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl JwtHeader {
    fn rs256(kid: impl Into<String>) -> Self {
        Self {
            alg: "RS256".to_string(),
            typ: "JWT".to_string(),
            kid: kid.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] RsaError),
    #[error("invalid signature")]
    InvalidSignature,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn decode_private_key(pem: &str) -> Result<RsaPrivateKey, Error> {
    if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(k);
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs1_pem(pem) {
        return Ok(k);
    }
    Err(Error::KeyParse)
}

fn decode_public_key(pem: &str) -> Result<RsaPublicKey, Error> {
    if let Ok(k) = RsaPublicKey::from_public_key_pem(pem) {
        return Ok(k);
    }
    if let Ok(k) = RsaPublicKey::from_pkcs1_pem(pem) {
        return Ok(k);
    }
    Err(Error::KeyParse)
}

/// Sign a claims struct as an RS256 JWT with the given `kid` header.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed, the claims cannot
/// be encoded, or signing fails.
pub fn sign_rs256<T: Serialize>(
    private_key_pem: &str,
    kid: impl Into<String>,
    claims: &T,
) -> Result<String, Error> {
    let header = JwtHeader::rs256(kid);
    let header_b64 = b64e_json(&header)?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let private_key = decode_private_key(private_key_pem)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Decode a token's header without verifying it, to learn which key it
/// claims to be signed with.
///
/// # Errors
///
/// Returns an error on a malformed token or a non-RS256 `alg`.
pub fn decode_header(token: &str) -> Result<JwtHeader, Error> {
    let header_b64 = token.split('.').next().ok_or(Error::TokenFormat)?;
    let header: JwtHeader = b64d_json(header_b64)?;
    if header.alg != "RS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }
    Ok(header)
}

/// Verify an RS256 JWT signature against a public key and return the
/// decoded claims.
///
/// # Errors
///
/// Returns an error if the token is malformed, the algorithm is not RS256,
/// or the signature does not verify.
pub fn verify_rs256<T: for<'de> Deserialize<'de>>(
    token: &str,
    public_key_pem: &str,
) -> Result<T, Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }

    let header: JwtHeader = b64d_json(header_b64)?;
    if header.alg != "RS256" {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let public_key = decode_public_key(public_key_pem)?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    b64d_json(claims_b64)
}
