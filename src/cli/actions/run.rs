use crate::cli::actions::{server, Action};
use anyhow::Result;

/// Interpret a parsed `Action`. Every invocation funnels through this match,
/// so a new subcommand only needs a variant and an arm here.
///
/// # Errors
/// Propagates whatever the selected action returns.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
    }
}
