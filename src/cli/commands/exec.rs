use crate::config::Context;
use crate::docker::{container_name, exec_interactive, exec_simple, DockerHandle, ExecOptions};
use crate::error::{Result, SitectlError};
use crate::terminal::{HostTerminal, Terminal};

const DEFAULT_SHELL: &str = "sh";

pub struct ExecArgs {
    pub tty: bool,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub env: Vec<String>,
    pub service: String,
    pub command: Vec<String>,
}

impl ExecArgs {
    fn options(self, container: String, interactive: bool) -> ExecOptions {
        let cmd = if self.command.is_empty() {
            vec![DEFAULT_SHELL.to_string()]
        } else {
            self.command
        };

        let base = if interactive {
            ExecOptions::interactive(container, cmd)
        } else {
            ExecOptions {
                attach_stdin: true,
                ..ExecOptions::simple(container, cmd)
            }
        };

        ExecOptions {
            env: self.env,
            working_dir: self.workdir,
            user: self.user,
            ..base
        }
    }
}

/// Returns the exit code of the command inside the container.
pub async fn execute(ctx: &Context, args: ExecArgs) -> Result<i64> {
    let mut docker = DockerHandle::connect(ctx).await?;
    let result = run(ctx, &docker, args).await;
    docker.close().await;
    result
}

async fn run(ctx: &Context, docker: &DockerHandle, args: ExecArgs) -> Result<i64> {
    let container = container_name(docker.api(), ctx, &args.service, false)
        .await?
        .ok_or_else(|| SitectlError::ContainerNotFound {
            service: args.service.clone(),
            project: ctx.project_name.clone(),
        })?;

    let terminal = HostTerminal;
    let interactive = args.tty && terminal.is_tty();
    let opts = args.options(container, interactive);

    if interactive {
        exec_interactive(docker.api(), &terminal, opts).await
    } else {
        exec_simple(docker.api(), opts).await
    }
}
