//! TOTP step-up authentication.
//!
//! Secrets are stored base32-encoded on the user record. Enrollment hands
//! the browser a QR code data URL plus the base32 secret for manual entry;
//! validation checks the current 30-second window with one step of skew.

use anyhow::anyhow;
use totp_rs::{Algorithm, Secret, TOTP};

use super::error::{CoreError, CoreResult};

/// Material handed to the browser during enrollment.
#[derive(Clone, Debug)]
pub struct OtpEnrollment {
    /// Base32 secret, persisted on the user only after the first valid code.
    pub secret_base32: String,
    /// `data:image/png;base64,...` QR code for authenticator apps.
    pub qr_code_data_url: String,
}

#[derive(Clone, Debug)]
pub struct OtpAuthenticator {
    issuer: String,
}

impl OtpAuthenticator {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    fn totp(&self, secret_base32: &str, account: &str) -> CoreResult<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| CoreError::Internal(anyhow!("malformed OTP secret: {e}")))?;
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| CoreError::Internal(anyhow!("TOTP init error: {e}")))
    }

    /// Begin enrollment for a user who has no OTP secret yet.
    ///
    /// # Errors
    /// Returns `Internal` if secret or QR generation fails.
    pub fn begin_enrollment(&self, account_email: &str) -> CoreResult<OtpEnrollment> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| CoreError::Internal(anyhow!("secret gen error: {e}")))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account_email.to_string(),
        )
        .map_err(|e| CoreError::Internal(anyhow!("TOTP init error: {e}")))?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| CoreError::Internal(anyhow!("QR gen error: {e}")))?;

        Ok(OtpEnrollment {
            secret_base32: totp.get_secret_base32(),
            qr_code_data_url: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Rebuild the QR material for a secret that was already handed out, so
    /// the browser can re-fetch the prompt without a new secret being minted.
    ///
    /// # Errors
    /// Returns `Internal` on a malformed secret or QR generation failure.
    pub fn enrollment_material(
        &self,
        secret_base32: &str,
        account_email: &str,
    ) -> CoreResult<OtpEnrollment> {
        let totp = self.totp(secret_base32, account_email)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|e| CoreError::Internal(anyhow!("QR gen error: {e}")))?;
        Ok(OtpEnrollment {
            secret_base32: totp.get_secret_base32(),
            qr_code_data_url: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Check a submitted code against a stored secret.
    ///
    /// # Errors
    /// Returns `IncorrectOtp` on a wrong code, `Internal` on a malformed
    /// stored secret.
    pub fn validate(&self, secret_base32: &str, account: &str, code: &str) -> CoreResult<()> {
        let totp = self.totp(secret_base32, account)?;
        if totp.check_current(code).unwrap_or(false) {
            Ok(())
        } else {
            Err(CoreError::IncorrectOtp)
        }
    }
}
