//! SFTP reads over an existing SSH session.

use std::path::Path;

use russh_sftp::client::SftpSession;
use tokio::io::AsyncReadExt;

use crate::error::{Result, SitectlError};
use crate::ssh::client::SshSession;

/// SFTP client for small remote reads.
pub struct SftpClient {
    session: SftpSession,
}

impl SftpClient {
    /// Start the sftp subsystem on a fresh channel of `ssh`.
    pub async fn new(ssh: &SshSession) -> Result<Self> {
        let channel = ssh.open_session().await?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SitectlError::Ssh(format!("Failed to request SFTP subsystem: {}", e)))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SitectlError::Ssh(format!("Failed to initialize SFTP: {}", e)))?;

        Ok(Self { session: sftp })
    }

    /// Read a whole remote file as UTF-8.
    pub async fn read_to_string(&self, path: &Path) -> Result<String> {
        let remote = path.to_string_lossy().into_owned();

        let mut file = self.session.open(remote.as_str()).await.map_err(|e| {
            SitectlError::Ssh(format!("Failed to open remote file {}: {}", remote, e))
        })?;

        let mut content = String::new();
        file.read_to_string(&mut content).await.map_err(|e| {
            SitectlError::Ssh(format!("Failed to read remote file {}: {}", remote, e))
        })?;

        tracing::debug!(path = %remote, bytes = content.len(), "Read remote file");
        Ok(content)
    }
}
