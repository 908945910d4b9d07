//! PTY-backed remote command execution.

use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SitectlError};
use crate::ssh::client::SshSession;

const TERMINAL_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 0),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// The channel operations the PTY loop drives.
pub trait PtyChannel {
    async fn send_data(&self, data: &[u8]) -> Result<()>;

    async fn send_eof(&self) -> Result<()>;

    /// Next message from the server, `None` once the channel is gone.
    async fn next_msg(&mut self) -> Option<ChannelMsg>;
}

impl PtyChannel for Channel<Msg> {
    async fn send_data(&self, data: &[u8]) -> Result<()> {
        self.data(data)
            .await
            .map_err(|e| SitectlError::Ssh(format!("Failed to send data: {}", e)))
    }

    async fn send_eof(&self) -> Result<()> {
        self.eof()
            .await
            .map_err(|e| SitectlError::Ssh(format!("Failed to send EOF: {}", e)))
    }

    async fn next_msg(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }
}

/// Open a channel on `session` running `command` under a PTY of `size`
/// (columns, rows).
pub async fn start_pty(session: &SshSession, command: &str, size: (u16, u16)) -> Result<Channel<Msg>> {
    let channel = session.open_session().await?;

    channel
        .request_pty(
            true,
            "xterm",
            size.0 as u32,
            size.1 as u32,
            0,
            0,
            TERMINAL_MODES,
        )
        .await
        .map_err(|e| SitectlError::Ssh(format!("Failed to request PTY: {}", e)))?;

    channel
        .exec(true, command.as_bytes())
        .await
        .map_err(|e| SitectlError::Ssh(format!("Failed to execute command: {}", e)))?;

    Ok(channel)
}

/// Pump `input` into the channel and the channel's output into `output`
/// until the server closes it.
///
/// Stdout and stderr are merged in arrival order and also handed to
/// `on_output`. Input EOF is passed on as channel EOF. Returns the remote
/// exit status, `None` if the server never sent one.
pub async fn io_loop<C, R, W, F>(
    channel: &mut C,
    mut input: R,
    mut output: W,
    mut on_output: F,
) -> Result<Option<u32>>
where
    C: PtyChannel,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&[u8]),
{
    let mut exit_status = None;
    let mut input_open = true;
    let mut input_buf = [0u8; 1024];

    loop {
        tokio::select! {
            result = input.read(&mut input_buf), if input_open => {
                match result {
                    Ok(0) => {
                        input_open = false;
                        channel.send_eof().await?;
                    }
                    Ok(n) => channel.send_data(&input_buf[..n]).await?,
                    Err(e) => {
                        tracing::warn!("stdin read error: {}", e);
                        input_open = false;
                    }
                }
            }

            msg = channel.next_msg() => {
                match msg {
                    Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                        output.write_all(&data).await?;
                        output.flush().await?;
                        on_output(&data);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                        exit_status = Some(status);
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        tracing::debug!("Remote command killed by signal {:?}", signal_name);
                    }
                    Some(ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
        }
    }

    Ok(exit_status)
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use russh::CryptoVec;
    use tokio::sync::Notify;

    use super::*;

    pub enum Step {
        Msg(ChannelMsg),
        /// Hold further messages until the client has sent EOF.
        AwaitEof,
    }

    pub fn stdout(data: &[u8]) -> Step {
        Step::Msg(ChannelMsg::Data {
            data: CryptoVec::from_slice(data),
        })
    }

    pub fn stderr(data: &[u8]) -> Step {
        Step::Msg(ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(data),
            ext: 1,
        })
    }

    pub fn exit(code: u32) -> Step {
        Step::Msg(ChannelMsg::ExitStatus { exit_status: code })
    }

    pub fn close() -> Step {
        Step::Msg(ChannelMsg::Close)
    }

    /// Replays a fixed server script and records what the client sent.
    #[derive(Default)]
    pub struct ScriptedChannel {
        steps: VecDeque<Step>,
        pub sent: Mutex<Vec<u8>>,
        pub eof_sent: AtomicBool,
        eof: Notify,
        fail_sends: bool,
    }

    impl ScriptedChannel {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                ..Default::default()
            }
        }

        /// Every send from the client fails.
        pub fn failing(mut self) -> Self {
            self.fail_sends = true;
            self
        }
    }

    impl PtyChannel for ScriptedChannel {
        async fn send_data(&self, data: &[u8]) -> Result<()> {
            if self.fail_sends {
                return Err(SitectlError::Ssh("channel closed".to_string()));
            }
            self.sent.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn send_eof(&self) -> Result<()> {
            self.eof_sent.store(true, Ordering::SeqCst);
            self.eof.notify_one();
            Ok(())
        }

        async fn next_msg(&mut self) -> Option<ChannelMsg> {
            loop {
                if matches!(self.steps.front()?, Step::AwaitEof) {
                    self.eof.notified().await;
                    self.steps.pop_front();
                    continue;
                }
                if let Some(Step::Msg(msg)) = self.steps.pop_front() {
                    return Some(msg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::fake::{close, exit, stderr, stdout, ScriptedChannel, Step};
    use super::*;

    #[tokio::test]
    async fn test_output_merged_in_order_with_exit_status() {
        let mut channel = ScriptedChannel::new(vec![
            stdout(b"Pulling drupal\n"),
            stderr(b"warning: no tag\n"),
            stdout(b"Done\n"),
            exit(3),
            close(),
        ]);

        let mut output: Vec<u8> = Vec::new();
        let mut seen: Vec<u8> = Vec::new();
        let status = io_loop(&mut channel, &b""[..], &mut output, |chunk| {
            seen.extend_from_slice(chunk)
        })
        .await
        .unwrap();

        assert_eq!(status, Some(3));
        assert_eq!(output, b"Pulling drupal\nwarning: no tag\nDone\n");
        assert_eq!(seen, output);
    }

    #[tokio::test]
    async fn test_input_forwarded_then_eof() {
        let mut channel = ScriptedChannel::new(vec![
            Step::AwaitEof,
            stdout(b"bye\n"),
            exit(0),
            close(),
        ]);

        let mut output: Vec<u8> = Vec::new();
        let status = io_loop(&mut channel, &b"SELECT 1;\n"[..], &mut output, |_| {})
            .await
            .unwrap();

        assert_eq!(status, Some(0));
        assert_eq!(*channel.sent.lock().unwrap(), b"SELECT 1;\n");
        assert!(channel.eof_sent.load(Ordering::SeqCst));
        assert_eq!(output, b"bye\n");
    }

    #[tokio::test]
    async fn test_close_without_exit_status() {
        let mut channel = ScriptedChannel::new(vec![stdout(b"partial"), close()]);

        let mut output: Vec<u8> = Vec::new();
        let status = io_loop(&mut channel, &b""[..], &mut output, |_| {})
            .await
            .unwrap();

        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn test_send_failure_is_error() {
        let mut channel = ScriptedChannel::new(vec![Step::AwaitEof, close()]).failing();

        let err = io_loop(&mut channel, &b"ls\n"[..], tokio::io::sink(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SitectlError::Ssh(_)));
    }
}
