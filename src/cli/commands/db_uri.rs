use console::style;

use crate::config::Context;
use crate::docker::{database_uris, DockerHandle};
use crate::error::Result;

/// Print the MySQL URI of the context's database, plus SSH tunnel parameters
/// for remote contexts.
pub async fn execute(ctx: &Context) -> Result<()> {
    let mut docker = DockerHandle::connect(ctx).await?;
    let result = database_uris(docker.api(), ctx, ctx).await;
    docker.close().await;

    let uris = result?;
    println!("{}", uris.mysql);
    if let Some(ssh) = uris.ssh {
        println!("{} {}", style("SSH:").dim(), ssh);
    }
    Ok(())
}
