//! Exec start over a hijacked HTTP connection.
//!
//! `POST /exec/{id}/start` with `Upgrade: tcp` turns the connection into the
//! raw exec stream, which is what the demultiplexer consumes.

use std::path::Path;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use super::AttachedExec;
use crate::error::{Result, SitectlError};

pub async fn start_exec(
    socket: &Path,
    api_version: &str,
    exec_id: &str,
    tty: bool,
) -> Result<AttachedExec> {
    let fail = |message: String| SitectlError::Attach {
        exec_id: exec_id.to_string(),
        message,
    };

    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| fail(format!("failed to connect to {}: {}", socket.display(), e)))?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| fail(format!("HTTP handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!("Exec connection closed: {}", e);
        }
    });

    let body = serde_json::to_vec(&serde_json::json!({ "Detach": false, "Tty": tty }))?;
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/v{}/exec/{}/start", api_version, exec_id))
        .header(header::HOST, "docker")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "tcp")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| fail(format!("failed to build request: {}", e)))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| fail(format!("failed to send start request: {}", e)))?;

    match response.status() {
        StatusCode::SWITCHING_PROTOCOLS => {
            let upgraded = hyper::upgrade::on(response)
                .await
                .map_err(|e| fail(format!("connection upgrade failed: {}", e)))?;
            let (output, input) = tokio::io::split(TokioIo::new(upgraded));
            Ok(AttachedExec {
                output: Box::new(output),
                input: Box::new(input),
            })
        }
        StatusCode::OK => {
            // Daemon streamed the output as a plain body; stdin is not available.
            let (client, server) = tokio::io::duplex(64 * 1024);
            let mut body = response.into_body();
            let (_, mut server_write) = tokio::io::split(server);

            tokio::spawn(async move {
                while let Some(frame) = body.frame().await {
                    match frame {
                        Ok(f) => {
                            if let Some(data) = f.data_ref() {
                                if server_write.write_all(data).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(_) => break,
                    }
                }
                let _ = server_write.shutdown().await;
            });

            let (output, input) = tokio::io::split(client);
            Ok(AttachedExec {
                output: Box::new(output),
                input: Box::new(input),
            })
        }
        status => {
            let body = response
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            Err(fail(format!(
                "daemon returned {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            )))
        }
    }
}
