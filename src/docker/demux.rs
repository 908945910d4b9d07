//! Splits Docker's multiplexed exec/attach stream into stdout and stderr.
//!
//! Each frame is an 8 byte header followed by the payload:
//!
//! ```text
//! [stream type: u8][0, 0, 0][payload length: u32 big-endian]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SitectlError};

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdin,
    Stdout,
    Stderr,
    SystemErr,
}

impl TryFrom<u8> for StreamType {
    type Error = SitectlError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(StreamType::Stdin),
            1 => Ok(StreamType::Stdout),
            2 => Ok(StreamType::Stderr),
            3 => Ok(StreamType::SystemErr),
            other => Err(SitectlError::Frame(format!("unknown stream type {}", other))),
        }
    }
}

/// Bytes written to each sink.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DemuxStats {
    pub stdout: u64,
    pub stderr: u64,
}

/// Copy frames from `reader` until EOF on a frame boundary.
///
/// Stdin frames go to `stdout`. A system-error frame ends the copy with its
/// message as the error.
pub async fn demux<R, O, E>(reader: &mut R, stdout: &mut O, stderr: &mut E) -> Result<DemuxStats>
where
    R: AsyncRead + Unpin + ?Sized,
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let mut stats = DemuxStats::default();

    while let Some((stream, len)) = read_header(reader).await? {
        match stream {
            StreamType::Stdin | StreamType::Stdout => {
                stats.stdout += copy_payload(reader, stdout, len).await?;
            }
            StreamType::Stderr => {
                stats.stderr += copy_payload(reader, stderr, len).await?;
            }
            StreamType::SystemErr => {
                let mut message: Vec<u8> = Vec::new();
                copy_payload(reader, &mut message, len).await?;
                return Err(SitectlError::Other(anyhow::anyhow!(
                    "error from daemon in stream: {}",
                    String::from_utf8_lossy(&message)
                )));
            }
        }
    }

    stdout.flush().await?;
    stderr.flush().await?;
    Ok(stats)
}

/// `None` on EOF before the first header byte.
async fn read_header<R>(reader: &mut R) -> Result<Option<(StreamType, usize)>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;

    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(SitectlError::Frame(format!(
                "truncated header: got {} of {} bytes",
                filled, HEADER_LEN
            )));
        }
        filled += n;
    }

    let stream = StreamType::try_from(header[0])?;
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    Ok(Some((stream, len)))
}

async fn copy_payload<R, W>(reader: &mut R, writer: &mut W, len: usize) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut payload = reader.take(len as u64);
    let copied = tokio::io::copy(&mut payload, writer).await?;
    if copied < len as u64 {
        return Err(SitectlError::Frame(format!(
            "truncated frame: expected {} bytes, got {}",
            len, copied
        )));
    }
    Ok(copied)
}
