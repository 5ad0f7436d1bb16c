//! Signing key selection.
//!
//! Keys are append-only; rotation inserts a new pair and the highest id
//! becomes the signer. Old keys stay available for verification until
//! every token they signed has expired.

use std::sync::Arc;

use super::error::{CoreError, CoreResult};
use crate::model::KeyPair;
use crate::store::Store;

#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn Store>,
}

impl KeyManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The key that signs all new tokens.
    ///
    /// # Errors
    /// Returns `NoSigningKey` when no key exists at all.
    pub async fn current(&self) -> CoreResult<KeyPair> {
        self.store
            .current_signing_key()
            .await?
            .ok_or(CoreError::NoSigningKey)
    }

    /// Resolve a key by the `kid` a token carries.
    ///
    /// # Errors
    /// Returns `NotFound` for an unparseable or unknown `kid`.
    pub async fn by_kid(&self, kid: &str) -> CoreResult<KeyPair> {
        let id: i64 = kid
            .parse()
            .map_err(|_| CoreError::NotFound("signing key"))?;
        self.store
            .get_signing_key_by_id(id)
            .await?
            .ok_or(CoreError::NotFound("signing key"))
    }
}
