//! Finding a live local docker socket.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::UnixStream;

use crate::error::{Result, SitectlError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

pub fn strip_unix_scheme(socket: &str) -> &str {
    socket.strip_prefix("unix://").unwrap_or(socket)
}

/// Whether something accepts connections on `socket`.
pub async fn is_socket_alive(socket: &str) -> bool {
    let socket = strip_unix_scheme(socket);
    if socket.is_empty() {
        return false;
    }
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket)).await,
        Ok(Ok(_))
    )
}

/// The configured socket if it is alive, else Docker Desktop's per-user
/// socket, else `$DOCKER_HOST`.
pub async fn resolve_local_socket(configured: &str) -> Result<PathBuf> {
    let mut candidates = vec![configured.to_string()];
    if let Some(home) = dirs::home_dir() {
        candidates.push(
            home.join(".docker/run/docker.sock")
                .to_string_lossy()
                .into_owned(),
        );
    }
    if let Ok(host) = std::env::var("DOCKER_HOST") {
        candidates.push(host);
    }

    first_alive(&candidates).await
}

async fn first_alive(candidates: &[String]) -> Result<PathBuf> {
    for candidate in candidates {
        if is_socket_alive(candidate).await {
            return Ok(PathBuf::from(strip_unix_scheme(candidate)));
        }
    }

    tracing::error!(tested = ?candidates, "Unable to determine docker socket");
    Err(SitectlError::Config(format!(
        "Unable to find a running docker daemon; tried {}",
        candidates.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_unix_scheme() {
        assert_eq!(strip_unix_scheme("unix:///var/run/docker.sock"), "/var/run/docker.sock");
        assert_eq!(strip_unix_scheme("/run/docker.sock"), "/run/docker.sock");
    }

    #[tokio::test]
    async fn test_first_alive_skips_dead_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("docker.sock");
        let _listener = tokio::net::UnixListener::bind(&live).unwrap();

        let candidates = vec![
            dir.path().join("dead.sock").to_string_lossy().into_owned(),
            format!("unix://{}", live.display()),
        ];

        assert_eq!(first_alive(&candidates).await.unwrap(), live);
    }

    #[tokio::test]
    async fn test_no_live_socket_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![
            dir.path().join("dead.sock").to_string_lossy().into_owned(),
            String::new(),
        ];

        let err = first_alive(&candidates).await.unwrap_err();
        assert!(err.to_string().contains("dead.sock"));
    }
}
