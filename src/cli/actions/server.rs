use crate::{api, core::config::IdpConfig};
use anyhow::Result;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub issuer_base_url: String,
    pub otp_issuer: Option<String>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub code_ttl_seconds: i64,
    pub auth_context_ttl_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, no signing key exists, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let mut config = IdpConfig::new(args.issuer_base_url)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(args.refresh_token_ttl_seconds)
        .with_code_ttl_seconds(args.code_ttl_seconds)
        .with_auth_context_ttl_seconds(args.auth_context_ttl_seconds);

    if let Some(otp_issuer) = args.otp_issuer {
        config = config.with_otp_issuer(otp_issuer);
    }

    debug!("Server config: {:?}", config);

    api::new(args.port, args.dsn, config).await
}
