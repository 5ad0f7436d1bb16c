use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names in ascending verbosity; the index is the count value.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Parser for `JANUA_LOG_LEVEL`: accepts a level name or a bare count (0-5).
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(|level: &str| -> std::result::Result<u8, String> {
        if let Ok(count) = level.parse::<u8>() {
            if count <= 5 {
                return Ok(count);
            }
        }

        let lowered = level.to_lowercase();
        LEVEL_NAMES
            .iter()
            .zip(0u8..)
            .find(|(name, _)| **name == lowered)
            .map(|(_, count)| count)
            .ok_or_else(|| "invalid log level".to_string())
    })
}

/// Attach the global `-v/--verbose` flag. Repeats raise the level; the
/// environment variable takes a name or a count instead.
#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("JANUA_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
