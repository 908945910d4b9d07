//! Run one command against a context, locally or over SSH.
//!
//! Both paths stream output live and hand back the last non-empty output line.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::Instrument;

use crate::config::Context;
use crate::error::{Result, SitectlError};
use crate::ssh::{io_loop, start_pty, PtyChannel, SshSession};
use crate::terminal::{with_raw_mode, Terminal};

/// Exit status of a remote process interrupted with Ctrl-C.
pub const SIGINT_EXIT: u32 = 130;

pub struct CommandRunner<'a> {
    ctx: &'a Context,
    terminal: &'a dyn Terminal,
}

impl<'a> CommandRunner<'a> {
    pub fn new(ctx: &'a Context, terminal: &'a dyn Terminal) -> Self {
        Self { ctx, terminal }
    }

    /// Run `cmd` in the context's project directory.
    ///
    /// Returns the last non-empty line the command printed, trimmed.
    pub async fn run(&self, cmd: Command) -> Result<String> {
        let span = self.ctx.span();
        if self.ctx.is_remote() {
            self.run_remote(&cmd).instrument(span).await
        } else {
            self.run_local(cmd).instrument(span).await
        }
    }

    async fn run_local(&self, mut cmd: Command) -> Result<String> {
        let shown = display_command(&cmd);

        if let Some(dir) = self.ctx.project_dir() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        tracing::debug!(cmd = %shown, "Running local command");

        let mut child = cmd.spawn().map_err(|e| SitectlError::CommandFailed {
            command: shown.clone(),
            message: format!("error starting command: {}", e),
        })?;

        let mut last = LastLine::default();
        if let Some(stdout) = child.stdout.take() {
            stream_lines(stdout, tokio::io::stdout(), &mut last).await;
        }

        let status = child.wait().await.map_err(|e| SitectlError::CommandFailed {
            command: shown.clone(),
            message: format!("error waiting for command: {}", e),
        })?;
        if !status.success() {
            return Err(SitectlError::CommandFailed {
                command: shown,
                message: status.to_string(),
            });
        }

        Ok(last.finish())
    }

    async fn run_remote(&self, cmd: &Command) -> Result<String> {
        let line = remote_command_line(self.ctx, cmd);

        let session = SshSession::dial(self.ctx).await?;
        tracing::info!(host = %self.ctx.ssh_hostname, cmd = %line, "Running remote command");

        let result = async {
            let mut channel = start_pty(&session, &line, self.terminal.size()).await?;
            drive_session(
                self.terminal,
                &mut channel,
                &line,
                tokio::io::stdin(),
                tokio::io::stdout(),
            )
            .await
        }
        .await;

        session.close().await;
        result
    }
}

/// Copy `reader` to `out` as it arrives, byte for byte, tracking the last line.
///
/// Reads to EOF even if `out` goes away, so the child never sees a closed pipe.
async fn stream_lines<R, W>(reader: R, mut out: W, last: &mut LastLine)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut echo = true;

    loop {
        buf.clear();
        let n = match reader.read_until(b'\n', &mut buf).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Error reading stdout: {}", e);
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    tracing::debug!("stdout drain: {}", e);
                }
                return;
            }
        };
        if n == 0 {
            break;
        }

        last.push(&buf);
        if echo {
            let written = async {
                out.write_all(&buf).await?;
                out.flush().await
            }
            .await;
            if let Err(e) = written {
                tracing::warn!("Stopped echoing command output: {}", e);
                echo = false;
            }
        }
    }
}

/// Run an already started PTY session with the terminal in raw mode.
async fn drive_session<C, R, W>(
    terminal: &dyn Terminal,
    channel: &mut C,
    line: &str,
    input: R,
    output: W,
) -> Result<String>
where
    C: PtyChannel,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut last = LastLine::default();
    let exit = with_raw_mode(
        terminal,
        io_loop(channel, input, output, |chunk| last.push(chunk)),
    )
    .await?;
    remote_outcome(line, exit, last.finish())
}

/// Map a remote exit status to the runner's result.
fn remote_outcome(command: &str, exit: Option<u32>, last_line: String) -> Result<String> {
    match exit {
        Some(0) | Some(SIGINT_EXIT) => Ok(last_line),
        Some(code) => Err(SitectlError::RemoteExit {
            command: command.to_string(),
            code,
        }),
        None => Err(SitectlError::CommandFailed {
            command: command.to_string(),
            message: "session closed without an exit status".to_string(),
        }),
    }
}

/// `cd <dir> && [sudo] <program> <args..>` with every word quoted.
pub fn remote_command_line(ctx: &Context, cmd: &Command) -> String {
    let mut line = String::new();

    if !ctx.project_dir.is_empty() {
        line.push_str("cd ");
        line.push_str(&shell_quote(&ctx.project_dir));
        line.push_str(" && ");
    }
    if ctx.run_sudo {
        line.push_str("sudo ");
    }
    line.push_str(&display_command(cmd));
    line
}

fn display_command(cmd: &Command) -> String {
    let std = cmd.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|word| shell_quote(&os_lossy(word)).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn os_lossy(word: &OsStr) -> String {
    word.to_string_lossy().into_owned()
}

/// Quote a word for a POSIX shell. Plain words pass through unchanged.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    if word.is_empty() {
        return Cow::Borrowed("''");
    }

    let safe = word
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', "'\\''")))
    }
}

/// Tracks the last non-empty line of a byte stream that arrives in chunks.
#[derive(Debug, Default)]
pub struct LastLine {
    pending: Vec<u8>,
    last: String,
}

impl LastLine {
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.push_line(&String::from_utf8_lossy(&line));
        }
    }

    pub fn push_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            self.last = trimmed.to_string();
        }
    }

    /// Flush any unterminated tail and return the last line.
    pub fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.push_line(&String::from_utf8_lossy(&tail));
        }
        self.last
    }
}
