//! Small helpers shared across the core.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Generate an unguessable URL-safe token of `bytes` random bytes.
///
/// Used for authorization code values, session identifiers, and browser
/// session ids.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_url_safe_token(bytes: usize) -> Result<String> {
    let mut buf = vec![0u8; bytes];
    OsRng
        .try_fill_bytes(&mut buf)
        .context("failed to read from the OS random source")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Constant-time equality for secrets: compares SHA-256 digests so timing
/// does not depend on where the inputs diverge.
#[must_use]
pub fn secrets_match(left: &str, right: &str) -> bool {
    let left = Sha256::digest(left.as_bytes());
    let right = Sha256::digest(right.as_bytes());
    left == right
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    #[test]
    fn now_unix_is_after_2024() {
        assert!(now_unix() > 1_700_000_000);
    }

    #[test]
    fn generated_tokens_decode_to_requested_length() {
        let token = generate_url_safe_token(64).expect("token");
        let decoded = URL_SAFE_NO_PAD.decode(token.as_bytes()).expect("base64");
        assert_eq!(decoded.len(), 64);
    }

    #[test]
    fn generated_tokens_differ() {
        let a = generate_url_safe_token(32).expect("token");
        let b = generate_url_safe_token(32).expect("token");
        assert_ne!(a, b);
    }

    #[test]
    fn secrets_match_compares_values() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "s3cret "));
    }
}
