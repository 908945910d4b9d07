//! Local terminal access: tty detection, size and raw mode.

use std::future::Future;

use crossterm::tty::IsTty;

use crate::error::{Result, SitectlError};

/// Size used when the terminal cannot report one (columns, rows).
pub const FALLBACK_SIZE: (u16, u16) = (80, 40);

/// The bits of the controlling terminal the runners need.
pub trait Terminal: Send + Sync {
    fn is_tty(&self) -> bool;

    /// (columns, rows)
    fn size(&self) -> (u16, u16);

    fn enable_raw_mode(&self) -> Result<()>;

    fn disable_raw_mode(&self) -> Result<()>;
}

/// The process's real stdin/stdout terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostTerminal;

impl Terminal for HostTerminal {
    fn is_tty(&self) -> bool {
        std::io::stdin().is_tty()
    }

    fn size(&self) -> (u16, u16) {
        crossterm::terminal::size().unwrap_or(FALLBACK_SIZE)
    }

    fn enable_raw_mode(&self) -> Result<()> {
        crossterm::terminal::enable_raw_mode()
            .map_err(|e| SitectlError::Other(anyhow::anyhow!("Failed to enable raw mode: {}", e)))
    }

    fn disable_raw_mode(&self) -> Result<()> {
        crossterm::terminal::disable_raw_mode()
            .map_err(|e| SitectlError::Other(anyhow::anyhow!("Failed to restore terminal: {}", e)))
    }
}

/// RAII guard to restore terminal mode on drop.
pub struct RawModeGuard<'a> {
    terminal: &'a dyn Terminal,
}

impl<'a> RawModeGuard<'a> {
    pub fn enable(terminal: &'a dyn Terminal) -> Result<Self> {
        terminal.enable_raw_mode()?;
        Ok(Self { terminal })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.terminal.disable_raw_mode() {
            tracing::warn!("{}", e);
        }
    }
}

/// Run `fut` with the terminal in raw mode when it is a tty.
///
/// The previous mode is restored on every exit path.
pub async fn with_raw_mode<F, T>(terminal: &dyn Terminal, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let _guard = if terminal.is_tty() {
        Some(RawModeGuard::enable(terminal)?)
    } else {
        None
    };
    fut.await
}
