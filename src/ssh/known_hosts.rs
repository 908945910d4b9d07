//! Host key verification against an OpenSSH known_hosts file.

use std::path::Path;

use crate::error::{Result, SitectlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// The presented key is listed for this host.
    Match,
    /// No entry for this host.
    Unknown,
    /// An entry exists but carries a different key.
    Changed { line: usize },
}

/// Look up `host:port` in `known_hosts`.
///
/// A missing file means every host is unknown.
pub fn verify(
    host: &str,
    port: u16,
    key: &russh_keys::PublicKey,
    known_hosts: &Path,
) -> Result<HostKeyStatus> {
    if !known_hosts.exists() {
        tracing::debug!(path = %known_hosts.display(), "known_hosts does not exist");
        return Ok(HostKeyStatus::Unknown);
    }

    match russh_keys::check_known_hosts_path(host, port, key, known_hosts) {
        Ok(true) => Ok(HostKeyStatus::Match),
        Ok(false) => Ok(HostKeyStatus::Unknown),
        Err(russh_keys::Error::KeyChanged { line }) => Ok(HostKeyStatus::Changed { line }),
        Err(e) => Err(SitectlError::Ssh(format!(
            "Failed to read known_hosts {}: {}",
            known_hosts.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ssh_key::{Algorithm, PrivateKey};

    /// Returns (base64 blob, parsed key).
    fn host_key() -> (String, russh_keys::PublicKey) {
        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).unwrap();
        let openssh = key.public_key().to_openssh().unwrap();
        let blob = openssh.split_whitespace().nth(1).unwrap().to_string();
        let parsed = russh_keys::parse_public_key_base64(&blob).unwrap();
        (blob, parsed)
    }

    fn known_hosts_with(lines: &[String]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("known_hosts"), lines.join("\n") + "\n").unwrap();
        dir
    }

    #[test]
    fn test_matching_key() {
        let (blob, key) = host_key();
        let dir = known_hosts_with(&[format!("[museum.example.org]:2222 ssh-ed25519 {}", blob)]);

        let status = verify("museum.example.org", 2222, &key, &dir.path().join("known_hosts"));
        assert_eq!(status.unwrap(), HostKeyStatus::Match);
    }

    #[test]
    fn test_unknown_host() {
        let (blob, key) = host_key();
        let dir = known_hosts_with(&[format!("other.example.org ssh-ed25519 {}", blob)]);

        let status = verify("museum.example.org", 22, &key, &dir.path().join("known_hosts"));
        assert_eq!(status.unwrap(), HostKeyStatus::Unknown);
    }

    #[test]
    fn test_changed_key() {
        let (old_blob, _) = host_key();
        let (_, new_key) = host_key();
        let dir = known_hosts_with(&[format!("museum.example.org ssh-ed25519 {}", old_blob)]);

        let status = verify("museum.example.org", 22, &new_key, &dir.path().join("known_hosts"));
        assert!(matches!(status.unwrap(), HostKeyStatus::Changed { .. }));
    }

    #[test]
    fn test_missing_file_is_unknown() {
        let (_, key) = host_key();
        let dir = tempfile::tempdir().unwrap();

        let status = verify("museum.example.org", 22, &key, &dir.path().join("known_hosts"));
        assert_eq!(status.unwrap(), HostKeyStatus::Unknown);
    }
}
