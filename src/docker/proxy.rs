//! Local unix socket that forwards every connection to a remote socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use crate::error::{Result, SitectlError};
use crate::ssh::{pipe, BoxedStream, SshSession};

/// Opens one stream to a unix socket on the far side.
#[async_trait]
pub trait SocketDialer: Send + Sync + 'static {
    async fn dial_socket(&self, path: &str) -> Result<BoxedStream>;
}

#[async_trait]
impl SocketDialer for SshSession {
    async fn dial_socket(&self, path: &str) -> Result<BoxedStream> {
        self.open_direct_streamlocal(path).await
    }
}

/// Listens on a socket in a private temp directory.
///
/// Dropping the proxy stops the accept loop and removes the directory.
pub struct SocketProxy {
    path: PathBuf,
    task: JoinHandle<()>,
    _dir: TempDir,
}

impl SocketProxy {
    pub fn start<D: SocketDialer>(dialer: D, remote_socket: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("sitectl-")
            .tempdir()
            .map_err(|source| SitectlError::SocketBind {
                path: std::env::temp_dir(),
                source,
            })?;
        let path = dir.path().join("docker.sock");
        let listener = bind_socket(&path)?;

        let remote = remote_socket.to_string();
        let task = tokio::spawn(async move {
            let dialer = std::sync::Arc::new(dialer);
            loop {
                let stream = match listener.accept().await {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::debug!("Docker proxy accept error: {}", e);
                        break;
                    }
                };

                let dialer = dialer.clone();
                let remote = remote.clone();
                tokio::spawn(async move {
                    match dialer.dial_socket(&remote).await {
                        Ok(channel) => pipe(stream, channel, "docker proxy").await,
                        Err(e) => tracing::warn!("Docker proxy: {}", e),
                    }
                });
            }
        });

        Ok(Self {
            path,
            task,
            _dir: dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn bind_socket(path: &Path) -> Result<UnixListener> {
    UnixListener::bind(path).map_err(|source| SitectlError::SocketBind {
        path: path.to_path_buf(),
        source,
    })
}

impl Drop for SocketProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    /// Dials a local unix socket, standing in for the SSH side.
    struct LocalDialer;

    #[async_trait]
    impl SocketDialer for LocalDialer {
        async fn dial_socket(&self, path: &str) -> Result<BoxedStream> {
            Ok(Box::new(UnixStream::connect(path).await?))
        }
    }

    #[tokio::test]
    async fn test_proxy_forwards_to_remote_socket() {
        let dir = tempfile::tempdir().unwrap();
        let remote_path = dir.path().join("remote.sock");
        let remote = tokio::net::UnixListener::bind(&remote_path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = remote.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(b"pong:").await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let proxy = SocketProxy::start(LocalDialer, &remote_path.to_string_lossy()).unwrap();
        let mut client = UnixStream::connect(proxy.path()).await.unwrap();
        client.write_all(b"hello").await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong:hello");
    }

    #[tokio::test]
    async fn test_bind_error_names_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("docker.sock");

        let err = bind_socket(&path).unwrap_err();
        assert!(matches!(err, SitectlError::SocketBind { .. }));
        assert!(err.to_string().contains("missing/docker.sock"));
    }

    #[tokio::test]
    async fn test_drop_removes_socket_dir() {
        let proxy = SocketProxy::start(LocalDialer, "/nonexistent.sock").unwrap();
        let path = proxy.path().to_path_buf();
        assert!(path.exists());

        drop(proxy);
        assert!(!path.exists());
    }
}
