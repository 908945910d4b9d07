//! Pure Rust SSH transport for remote contexts.
//!
//! ## Modules
//!
//! - [`client`] - connection, authentication and channel creation
//! - [`keys`] - private key loading with passphrase prompt
//! - [`known_hosts`] - host key verification
//! - [`pty`] - remote commands under a PTY
//! - [`sftp`] - small file reads
//! - [`tunnel`] - byte-stream plumbing for forwarded connections

mod client;
mod keys;
mod known_hosts;
pub(crate) mod pty;
mod sftp;
mod tunnel;

pub use client::SshSession;
pub use pty::{io_loop, start_pty, PtyChannel};
pub use sftp::SftpClient;
pub use tunnel::{pipe, BoxedStream};
