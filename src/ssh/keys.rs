//! Private key loading with interactive passphrase prompt.

use std::path::Path;

use ssh_key::PrivateKey;

use crate::error::{Result, SitectlError};

/// Load the private key at `path`, prompting for a passphrase if it is encrypted.
pub fn load_private_key(path: &Path) -> Result<russh_keys::PrivateKey> {
    let pem = std::fs::read_to_string(path).map_err(|source| SitectlError::KeyRead {
        path: path.to_path_buf(),
        source,
    })?;

    if !key_is_encrypted(&pem) {
        return decode_key(&pem, None, path);
    }

    tracing::debug!(key = %path.display(), "Key is encrypted, prompting for passphrase");
    let passphrase = prompt_passphrase(path)?;
    decode_key(&pem, Some(&passphrase), path)
}

/// Check whether a key file's contents need a passphrase.
///
/// Handles both the OpenSSH format and legacy PEM (`Proc-Type: 4,ENCRYPTED`).
pub fn key_is_encrypted(pem: &str) -> bool {
    match PrivateKey::from_openssh(pem) {
        Ok(key) => key.is_encrypted(),
        Err(_) => pem.contains("ENCRYPTED"),
    }
}

pub(crate) fn decode_key(
    pem: &str,
    passphrase: Option<&str>,
    path: &Path,
) -> Result<russh_keys::PrivateKey> {
    russh_keys::decode_secret_key(pem, passphrase).map_err(|e| SitectlError::KeyParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn prompt_passphrase(path: &Path) -> Result<String> {
    let passphrase = dialoguer::Password::new()
        .with_prompt(format!("Enter passphrase for SSH key {}", path.display()))
        .allow_empty_password(true)
        .interact()?;
    Ok(passphrase)
}
