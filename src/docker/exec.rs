//! Running commands inside containers through the exec API.

use bollard::exec::CreateExecOptions;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{demux, AttachedExec, DockerApi};
use crate::error::{Result, SitectlError};
use crate::terminal::{with_raw_mode, Terminal};

/// What to run and which streams to attach.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Container id or name.
    pub container: String,
    pub cmd: Vec<String>,
    /// Extra `KEY=value` entries.
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
}

impl ExecOptions {
    /// Output only, no TTY.
    pub fn simple(container: impl Into<String>, cmd: Vec<String>) -> Self {
        Self {
            container: container.into(),
            cmd,
            attach_stdout: true,
            attach_stderr: true,
            ..Default::default()
        }
    }

    /// All streams plus a TTY.
    pub fn interactive(container: impl Into<String>, cmd: Vec<String>) -> Self {
        Self {
            container: container.into(),
            cmd,
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: true,
            ..Default::default()
        }
    }

    fn to_create_options(&self) -> CreateExecOptions<String> {
        CreateExecOptions {
            attach_stdin: Some(self.attach_stdin),
            attach_stdout: Some(self.attach_stdout),
            attach_stderr: Some(self.attach_stderr),
            tty: Some(self.tty),
            env: (!self.env.is_empty()).then(|| self.env.clone()),
            cmd: Some(self.cmd.clone()),
            user: self.user.clone(),
            working_dir: self.working_dir.clone(),
            ..Default::default()
        }
    }
}

/// Where exec streams come from and go to.
pub struct ExecIo<'a> {
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin + 'a>>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin + 'a>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin + 'a>,
}

impl ExecIo<'static> {
    /// The process's own stdin, stdout and stderr.
    pub fn stdio() -> Self {
        Self {
            stdin: Some(Box::new(tokio::io::stdin())),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

/// Create, attach and wait for an exec. Returns its exit code.
///
/// With a TTY the output is copied as is; without one it is demultiplexed
/// into stdout and stderr.
pub async fn exec(api: &dyn DockerApi, opts: ExecOptions, io: ExecIo<'_>) -> Result<i64> {
    let exec_id = api
        .create_exec(&opts.container, opts.to_create_options())
        .await?;
    tracing::debug!(container = %opts.container, exec_id = %exec_id, cmd = ?opts.cmd, "Created exec");

    let AttachedExec {
        mut output,
        mut input,
    } = api.start_exec(&exec_id, opts.tty).await?;
    let ExecIo {
        stdin,
        mut stdout,
        mut stderr,
    } = io;

    let copy_output = async {
        if opts.tty {
            tokio::io::copy(&mut output, &mut stdout).await?;
            stdout.flush().await?;
        } else {
            let stats = demux(&mut output, &mut stdout, &mut stderr).await?;
            tracing::debug!(
                "exec output done. Stdout {} bytes, stderr {} bytes",
                stats.stdout,
                stats.stderr
            );
        }
        Ok::<(), SitectlError>(())
    };

    let forward_input = async {
        if let Some(mut stdin) = stdin.filter(|_| opts.attach_stdin) {
            if let Err(e) = tokio::io::copy(&mut stdin, &mut input).await {
                tracing::debug!("exec stdin copy: {}", e);
            }
            if let Err(e) = input.shutdown().await {
                tracing::debug!("exec stdin close: {}", e);
            }
        }
        // Output decides when the exec is over.
        std::future::pending::<()>().await
    };

    tokio::select! {
        result = copy_output => result?,
        _ = forward_input => {}
    }

    let exit_code = api.inspect_exec(&exec_id).await?;
    exit_code.ok_or_else(|| SitectlError::Attach {
        exec_id,
        message: "exec stream ended but the process has no exit code".to_string(),
    })
}

/// Run `opts` without a TTY, stdout and stderr demultiplexed onto the
/// process's own. Stdin is forwarded only if `opts` asks for it.
pub async fn exec_simple(api: &dyn DockerApi, opts: ExecOptions) -> Result<i64> {
    let opts = ExecOptions {
        attach_stdout: true,
        attach_stderr: true,
        tty: false,
        ..opts
    };
    exec(api, opts, ExecIo::stdio()).await
}

/// Run `opts` with every stream attached and a TTY, holding the local
/// terminal in raw mode meanwhile.
pub async fn exec_interactive(
    api: &dyn DockerApi,
    terminal: &dyn Terminal,
    opts: ExecOptions,
) -> Result<i64> {
    let opts = ExecOptions {
        attach_stdin: true,
        attach_stdout: true,
        attach_stderr: true,
        tty: true,
        ..opts
    };
    with_raw_mode(terminal, exec(api, opts, ExecIo::stdio())).await
}
