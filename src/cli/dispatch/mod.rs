//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{tokens, ARG_ISSUER_BASE_URL, ARG_OTP_ISSUER};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let issuer_base_url = matches
        .get_one::<String>(ARG_ISSUER_BASE_URL)
        .cloned()
        .context("missing required argument: --issuer-base-url")?;

    let token_opts = tokens::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        issuer_base_url,
        otp_issuer: matches.get_one::<String>(ARG_OTP_ISSUER).cloned(),
        access_token_ttl_seconds: token_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: token_opts.refresh_token_ttl_seconds,
        code_ttl_seconds: token_opts.code_ttl_seconds,
        auth_context_ttl_seconds: token_opts.auth_context_ttl_seconds,
    }))
}
