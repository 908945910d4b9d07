//! SSH client implementation using russh.
//!
//! Provides connection management, authentication and channel creation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, Disconnect};
use tokio::sync::Mutex;

use crate::config::{Context, SshTarget};
use crate::error::{Result, SitectlError};
use crate::ssh::known_hosts::{self, HostKeyStatus};
use crate::ssh::tunnel::BoxedStream;

/// Upper bound for TCP connect, handshake and authentication together.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// An authenticated SSH connection.
///
/// Clones share the same connection. Channels can be opened from any number
/// of tasks; opening is serialized, the channels themselves run concurrently.
#[derive(Clone)]
pub struct SshSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    handle: Mutex<Handle<ClientHandler>>,
    target: String,
    closed: AtomicBool,
}

impl SshSession {
    /// Dial the remote host of `ctx`. One call is one attempt.
    pub async fn dial(ctx: &Context) -> Result<Self> {
        let target = ctx.ssh_target()?;
        let key = crate::ssh::keys::load_private_key(&target.key_path)?;

        let addr = target.addr();
        tracing::debug!(addr = %addr, known_hosts = %target.known_hosts_path().display(), "Dialing SSH");

        let config = Arc::new(client::Config {
            inactivity_timeout: None,
            // Send keep-alive every 15 seconds
            keepalive_interval: Some(Duration::from_secs(15)),
            keepalive_max: 4,
            ..Default::default()
        });
        let handler = ClientHandler::new(&target);

        let connect = async {
            let mut handle =
                client::connect(config, (target.hostname.as_str(), target.port), handler).await?;

            let authenticated = handle
                .authenticate_publickey(&target.user, Arc::new(key))
                .await?;
            if !authenticated {
                return Err(SitectlError::Ssh(format!(
                    "{} rejected key {} for user {}",
                    addr,
                    target.key_path.display(),
                    target.user
                )));
            }
            Ok(handle)
        };

        let handle = tokio::time::timeout(DIAL_TIMEOUT, connect)
            .await
            .map_err(|_| SitectlError::DialTimeout {
                addr: addr.clone(),
                secs: DIAL_TIMEOUT.as_secs(),
            })?
            .map_err(|e| match e {
                e @ (SitectlError::HostKeyUnknown { .. }
                | SitectlError::HostKeyChanged { .. }
                | SitectlError::Ssh(_)) => e,
                other => SitectlError::Ssh(format!("error dialing SSH at {}: {}", addr, other)),
            })?;

        tracing::debug!(addr = %addr, user = %target.user, "SSH connection established");

        Ok(Self {
            inner: Arc::new(SessionInner {
                handle: Mutex::new(handle),
                target: format!("{}@{}", target.user, addr),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// `user@host:port` of this connection, for log and error context.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// Open a plain session channel (exec, shell, subsystem).
    pub async fn open_session(&self) -> Result<Channel<Msg>> {
        let handle = self.inner.handle.lock().await;
        handle.channel_open_session().await.map_err(|e| {
            SitectlError::Ssh(format!("Failed to open session on {}: {}", self.target(), e))
        })
    }

    /// Open a `direct-tcpip` channel to `host:port` as seen from the remote side.
    pub async fn open_direct_tcpip(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let channel = {
            let handle = self.inner.handle.lock().await;
            handle
                .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
                .await
                .map_err(|e| {
                    SitectlError::Ssh(format!(
                        "Failed to dial {}:{} via {}: {}",
                        host,
                        port,
                        self.target(),
                        e
                    ))
                })?
        };
        Ok(Box::new(channel.into_stream()))
    }

    /// Open a `direct-streamlocal` channel to a unix socket on the remote side.
    pub async fn open_direct_streamlocal(&self, socket_path: &str) -> Result<BoxedStream> {
        let channel = {
            let handle = self.inner.handle.lock().await;
            handle
                .channel_open_direct_streamlocal(socket_path)
                .await
                .map_err(|e| {
                    SitectlError::Ssh(format!(
                        "Failed to dial unix:{} via {}: {}",
                        socket_path,
                        self.target(),
                        e
                    ))
                })?
        };
        Ok(Box::new(channel.into_stream()))
    }

    /// Disconnect. Only the first call on any clone does anything.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = self.inner.handle.lock().await;
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!(target = %self.target(), "SSH disconnect: {}", e);
        }
    }
}

/// Client handler for russh connection callbacks.
pub struct ClientHandler {
    host: String,
    port: u16,
    user: String,
    known_hosts: PathBuf,
}

impl ClientHandler {
    fn new(target: &SshTarget) -> Self {
        Self {
            host: target.hostname.clone(),
            port: target.port,
            user: target.user.clone(),
            known_hosts: target.known_hosts_path(),
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = SitectlError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match known_hosts::verify(&self.host, self.port, server_public_key, &self.known_hosts)? {
            HostKeyStatus::Match => Ok(true),
            HostKeyStatus::Unknown => Err(SitectlError::HostKeyUnknown {
                host: self.host.clone(),
                port: self.port,
                user: self.user.clone(),
            }),
            HostKeyStatus::Changed { line } => Err(SitectlError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                user: self.user.clone(),
                line,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use ssh_key::{Algorithm, LineEnding, PrivateKey};

    fn remote_context(key_path: &std::path::Path, port: u16) -> Context {
        let mut ctx = Context::local("prod", "/opt/site");
        ctx.kind = crate::config::HostKind::Remote;
        ctx.ssh_user = "deploy".to_string();
        ctx.ssh_hostname = "127.0.0.1".to_string();
        ctx.ssh_port = port;
        ctx.ssh_key_path = key_path.to_string_lossy().into_owned();
        ctx
    }

    fn write_key(dir: &std::path::Path) -> std::path::PathBuf {
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let path = dir.join("id_ed25519");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(key.to_openssh(LineEnding::LF).unwrap().as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn test_handler_uses_known_hosts_next_to_key() {
        let target = SshTarget {
            user: "deploy".to_string(),
            hostname: "museum.example.org".to_string(),
            port: 2222,
            key_path: PathBuf::from("/home/me/.ssh/id_rsa"),
        };
        let handler = ClientHandler::new(&target);

        assert_eq!(handler.known_hosts, PathBuf::from("/home/me/.ssh/known_hosts"));
        assert_eq!(handler.port, 2222);
    }

    #[tokio::test]
    async fn test_dial_missing_key_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = remote_context(&dir.path().join("missing"), 22);

        let err = SshSession::dial(&ctx).await.err().unwrap();
        assert!(matches!(err, SitectlError::KeyRead { .. }));
    }

    #[tokio::test]
    async fn test_dial_refused_is_single_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(dir.path());

        // Grab a free port and release it so nothing is listening there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let started = std::time::Instant::now();
        let err = SshSession::dial(&remote_context(&key, port)).await.err().unwrap();

        assert!(started.elapsed() <= DIAL_TIMEOUT + Duration::from_secs(1));
        assert!(err.to_string().contains(&format!("127.0.0.1:{}", port)));
    }

    #[tokio::test]
    async fn test_dial_silent_server_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let key = write_key(dir.path());

        // Accepts TCP but never speaks SSH.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let err = SshSession::dial(&remote_context(&key, port)).await.err().unwrap();
        assert!(matches!(err, SitectlError::DialTimeout { .. }));
    }
}
