//! Token and flow lifetime arguments.

use clap::{Arg, Command};

pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl";
pub const ARG_CODE_TTL: &str = "code-ttl";
pub const ARG_AUTH_CONTEXT_TTL: &str = "auth-context-ttl";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token lifetime in seconds")
                .default_value("300")
                .env("JANUA_ACCESS_TOKEN_TTL")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token lifetime in seconds")
                .default_value("1800")
                .env("JANUA_REFRESH_TOKEN_TTL")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CODE_TTL)
                .long(ARG_CODE_TTL)
                .help("Authorization code lifetime in seconds")
                .default_value("300")
                .env("JANUA_CODE_TTL")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_AUTH_CONTEXT_TTL)
                .long(ARG_AUTH_CONTEXT_TTL)
                .help("Pending login flow lifetime in seconds")
                .default_value("1200")
                .env("JANUA_AUTH_CONTEXT_TTL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

pub struct Options {
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub code_ttl_seconds: i64,
    pub auth_context_ttl_seconds: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        Self {
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL)
                .copied()
                .unwrap_or(300),
            refresh_token_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_TTL)
                .copied()
                .unwrap_or(1800),
            code_ttl_seconds: matches.get_one::<i64>(ARG_CODE_TTL).copied().unwrap_or(300),
            auth_context_ttl_seconds: matches
                .get_one::<u64>(ARG_AUTH_CONTEXT_TTL)
                .copied()
                .unwrap_or(1200),
        }
    }
}
