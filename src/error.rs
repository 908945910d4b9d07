use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SitectlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SSH connection error: {0}")]
    Ssh(String),

    #[error("Error reading SSH key {}: {source}", .path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing SSH key {}: {message}", .path.display())]
    KeyParse { path: PathBuf, message: String },

    #[error(
        "The host key for {host}:{port} is not known.\n\
         Your known_hosts file doesn't have an entry for this host.\n\n\
         Try running `ssh -p {port} -t {user}@{host}` and trying again"
    )]
    HostKeyUnknown { host: String, port: u16, user: String },

    #[error(
        "The host key for {host}:{port} does not match the expected key (known_hosts line {line}).\n\
         The host's key may have changed, or there could be a security issue.\n\
         Verify the new key with your host administrator. If the change is legitimate,\n\
         remove the old key from known_hosts and add the new one.\n\n\
         Try running `ssh -p {port} -t {user}@{host}` and trying again"
    )]
    HostKeyChanged {
        host: String,
        port: u16,
        user: String,
        line: usize,
    },

    #[error("Timed out after {secs}s dialing SSH at {addr}")]
    DialTimeout { addr: String, secs: u64 },

    #[error("SSH protocol error: {0}")]
    SshProtocol(#[from] russh::Error),

    #[error("No container found for service {service} in project {project}")]
    ContainerNotFound { service: String, project: String },

    #[error("Network {network:?} not found in container {container:?}")]
    NetworkNotFound { network: String, container: String },

    #[error("Environment variable {name:?} not found in container {container}")]
    EnvNotFound { name: String, container: String },

    #[error("Docker {op} failed for {target}: {source}")]
    Docker {
        op: &'static str,
        target: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("Failed to attach to exec {exec_id}: {message}")]
    Attach { exec_id: String, message: String },

    #[error("Malformed exec stream: {0}")]
    Frame(String),

    #[error("Invalid port forwarding spec '{spec}': {reason}")]
    InvalidForwardSpec { spec: String, reason: String },

    #[error("Local port {port} appears to be in use: {source}")]
    PortInUse {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Error reading {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to listen on socket {}: {source}", .path.display())]
    SocketBind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Command {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Remote command {command:?} exited with status {code}")]
    RemoteExit { command: String, code: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dialog error: {0}")]
    Dialog(#[from] dialoguer::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SitectlError {
    /// Wrap a bollard error with the operation and the object it targeted.
    pub fn docker(op: &'static str, target: impl Into<String>, source: bollard::errors::Error) -> Self {
        Self::Docker {
            op,
            target: target.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SitectlError>;
