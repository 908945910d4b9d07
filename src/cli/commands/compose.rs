use std::path::Path;

use tokio::process::Command;

use crate::config::Context;
use crate::error::{Result, SitectlError};
use crate::runner::CommandRunner;
use crate::terminal::HostTerminal;

const COMPOSE_COMMANDS: &[&str] = &[
    "attach", "build", "commit", "config", "cp", "create", "down", "events", "exec", "export",
    "images", "kill", "logs", "ls", "pause", "port", "ps", "pull", "push", "restart", "rm", "run",
    "scale", "start", "stats", "stop", "top", "unpause", "up", "version", "wait", "watch", "-h",
    "--help",
];

const COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

pub async fn execute(ctx: &Context, args: Vec<String>) -> Result<()> {
    let args = compose_args(ctx, args)?;

    if !ctx.is_remote() {
        ensure_compose_file(ctx)?;
    }

    let mut cmd = Command::new("docker");
    cmd.args(&args);
    CommandRunner::new(ctx, &HostTerminal).run(cmd).await?;
    Ok(())
}

/// Full `docker` argument list for a compose invocation in `ctx`.
pub fn compose_args(ctx: &Context, mut args: Vec<String>) -> Result<Vec<String>> {
    let subcommand = args.first().cloned().unwrap_or_default();
    if !COMPOSE_COMMANDS.contains(&subcommand.as_str()) {
        return Err(SitectlError::Config(format!(
            "unknown docker compose command: {}",
            subcommand
        )));
    }

    let has = |flag: &str| args.iter().any(|a| a == flag);
    let (detached, pulls) = (has("-d") || has("--detach"), has("--pull"));
    if subcommand == "up" && !detached {
        args.extend(["-d".to_string(), "--remove-orphans".to_string()]);
    } else if subcommand == "build" && !pulls {
        args.push("--pull".to_string());
    }

    let mut full = vec!["compose".to_string()];
    if let Some(profile) = ctx.profile.as_deref().filter(|p| !p.is_empty()) {
        full.extend(["--profile".to_string(), profile.to_string()]);
    }
    for file in &ctx.compose_file {
        full.extend(["-f".to_string(), file.clone()]);
    }
    for env in &ctx.env_file {
        full.extend(["--env-file".to_string(), env.clone()]);
    }
    full.extend(args);
    Ok(full)
}

fn ensure_compose_file(ctx: &Context) -> Result<()> {
    let dir = ctx.project_dir().unwrap_or_default();

    let found = if ctx.compose_file.is_empty() {
        COMPOSE_FILES.iter().any(|name| dir.join(name).exists())
    } else {
        ctx.compose_file
            .iter()
            .all(|file| dir.join(Path::new(file)).exists())
    };

    if !found {
        return Err(SitectlError::Config(format!(
            "No compose file found in {}",
            dir.display()
        )));
    }
    Ok(())
}
