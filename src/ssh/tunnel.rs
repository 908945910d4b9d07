//! Byte-stream plumbing shared by port forwards and the docker socket proxy.

use tokio::io::{AsyncRead, AsyncWrite};

/// Anything that can carry one forwarded connection.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// SSH channel streams and plain sockets behind one type.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Copy both directions until either side closes, then log the totals.
pub async fn pipe<L, R>(mut local: L, mut remote: R, label: &str)
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(&mut local, &mut remote).await {
        Ok((sent, received)) => {
            tracing::debug!(
                "{}: connection closed. Sent {} bytes, received {} bytes",
                label,
                sent,
                received
            );
        }
        Err(e) => {
            tracing::debug!("{}: copy error: {}", label, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pipe_copies_both_directions() {
        let (client, local) = tokio::io::duplex(64);
        let (remote, server) = tokio::io::duplex(64);

        let piped = tokio::spawn(async move {
            let remote: BoxedStream = Box::new(remote);
            pipe(local, remote, "test").await;
        });

        let (mut client, mut server) = (client, server);
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client);
        drop(server);
        piped.await.unwrap();
    }
}
