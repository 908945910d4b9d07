use tokio::process::Command;

use crate::config::Context;
use crate::error::Result;
use crate::runner::CommandRunner;
use crate::terminal::HostTerminal;

/// Run the project's own `make` targets in its directory.
pub async fn execute(ctx: &Context, args: Vec<String>) -> Result<()> {
    CommandRunner::new(ctx, &HostTerminal)
        .run(make_command(args))
        .await?;
    Ok(())
}

pub fn make_command(args: Vec<String>) -> Command {
    let mut cmd = Command::new("make");
    cmd.args(args);
    cmd
}
