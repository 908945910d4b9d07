use crate::config::Context;
use crate::docker::{config_env, container_name, secret, DockerHandle};
use crate::error::{Result, SitectlError};

/// Where a value is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Mounted secret file first, declared environment second.
    Secret,
    /// Declared environment only.
    Env,
}

pub async fn execute(ctx: &Context, service: &str, name: &str, source: Source) -> Result<()> {
    let mut docker = DockerHandle::connect(ctx).await?;
    let result = lookup(ctx, &docker, service, name, source).await;
    docker.close().await;

    println!("{}", result?);
    Ok(())
}

async fn lookup(
    ctx: &Context,
    docker: &DockerHandle,
    service: &str,
    name: &str,
    source: Source,
) -> Result<String> {
    let container = container_name(docker.api(), ctx, service, false)
        .await?
        .ok_or_else(|| SitectlError::ContainerNotFound {
            service: service.to_string(),
            project: ctx.project_name.clone(),
        })?;

    match source {
        Source::Secret => secret(docker.api(), ctx, ctx, &container, name).await,
        Source::Env => config_env(docker.api(), &container, name).await,
    }
}
