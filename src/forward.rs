//! Local TCP port forwarding to compose services.
//!
//! Each `LOCAL:SERVICE:REMOTE` spec gets its own loopback listener and accept
//! loop. Connections are tunneled over the context's SSH connection, or dialed
//! directly for local contexts on Linux.

use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use console::style;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::Context;
use crate::docker::{container_name, service_ip, DockerHandle};
use crate::error::{Result, SitectlError};
use crate::ssh::{pipe, BoxedStream, SshSession};

/// One `LOCAL-PORT:SERVICE:REMOTE-PORT` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub local_port: u16,
    pub service: String,
    pub remote_port: u16,
}

impl FromStr for ForwardSpec {
    type Err = SitectlError;

    fn from_str(spec: &str) -> Result<Self> {
        let invalid = |reason: String| SitectlError::InvalidForwardSpec {
            spec: spec.to_string(),
            reason,
        };

        let parts: Vec<&str> = spec.split(':').collect();
        let [local, service, remote] = parts.as_slice() else {
            return Err(invalid(
                "expected format LOCAL-PORT:SERVICE:REMOTE-PORT".to_string(),
            ));
        };

        let local_port = local
            .parse::<u16>()
            .map_err(|_| invalid(format!("invalid local port '{}': must be an integer", local)))?;
        let remote_port = remote.parse::<u16>().map_err(|_| {
            invalid(format!("invalid remote port '{}': must be an integer", remote))
        })?;
        if service.is_empty() {
            return Err(invalid("service name is empty".to_string()));
        }

        Ok(Self {
            local_port,
            service: service.to_string(),
            remote_port,
        })
    }
}

/// Parse every spec before anything is bound.
pub fn parse_specs(specs: &[String]) -> Result<Vec<ForwardSpec>> {
    specs.iter().map(|spec| spec.parse()).collect()
}

/// Opens the far end of one forwarded connection.
#[async_trait]
pub trait TunnelDialer: Send + Sync + 'static {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream>;

    /// Shown to the user next to each forward.
    fn transport(&self) -> &'static str;
}

#[async_trait]
impl TunnelDialer for SshSession {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        self.open_direct_tcpip(host, port).await
    }

    fn transport(&self) -> &'static str {
        "SSH"
    }
}

/// Plain TCP, for container IPs routable from this machine.
pub struct DirectDialer;

#[async_trait]
impl TunnelDialer for DirectDialer {
    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| SitectlError::Connect {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        Ok(Box::new(stream))
    }

    fn transport(&self) -> &'static str {
        "direct TCP"
    }
}

/// A resolved forward: where to listen and where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

/// A set of bound listeners sharing one dialer.
pub struct PortForwarder {
    dialer: Arc<dyn TunnelDialer>,
    listeners: Vec<(TcpListener, Forward)>,
}

impl PortForwarder {
    pub fn new(dialer: Arc<dyn TunnelDialer>) -> Self {
        Self {
            dialer,
            listeners: Vec::new(),
        }
    }

    /// Bind `127.0.0.1:<local_port>` for `forward`. Returns the bound address.
    pub async fn bind(&mut self, forward: Forward) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("127.0.0.1", forward.local_port))
            .await
            .map_err(|source| SitectlError::PortInUse {
                port: forward.local_port,
                source,
            })?;
        let addr = listener.local_addr()?;
        self.listeners.push((listener, forward));
        Ok(addr)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Serve every listener until `shutdown` resolves, then close them all.
    ///
    /// Connections already being copied are left to finish on their own.
    pub async fn run_until<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut loops = JoinSet::new();
        tracing::debug!(forwards = self.len(), transport = self.dialer.transport(), "Starting port forwards");

        for (listener, forward) in self.listeners {
            let local_port = listener.local_addr()?.port();
            println!(
                "Forwarding {} -> {} via {}",
                style(format!("localhost:{}", local_port)).cyan(),
                style(format!("{}:{}", forward.remote_host, forward.remote_port)).cyan(),
                self.dialer.transport()
            );
            loops.spawn(accept_loop(
                listener,
                forward,
                self.dialer.clone(),
                stop_rx.clone(),
            ));
        }

        shutdown.await;
        println!("{}", style("Shutting down port forwards...").dim());

        let _ = stop_tx.send(true);
        while loops.join_next().await.is_some() {}
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    forward: Forward,
    dialer: Arc<dyn TunnelDialer>,
    mut stop: watch::Receiver<bool>,
) {
    let remote = format!("{}:{}", forward.remote_host, forward.remote_port);

    loop {
        let accepted = tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => accepted,
        };

        let (local, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(port = forward.local_port, "Error accepting connection: {}", e);
                break;
            }
        };
        tracing::debug!(peer = %peer, remote = %remote, "Tunnel: accepted connection");

        let dialer = dialer.clone();
        let forward = forward.clone();
        let remote = remote.clone();
        tokio::spawn(async move {
            match dialer.dial(&forward.remote_host, forward.remote_port).await {
                Ok(channel) => pipe(local, channel, &format!("Tunnel {}", remote)).await,
                Err(e) => tracing::error!(remote = %remote, "Failed to dial remote address: {}", e),
            }
        });
    }
    // Listener is dropped here, closing the port.
}

/// Resolves on Ctrl-C, SIGTERM or SIGHUP.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Cannot listen for SIGHUP: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
            _ = hup.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Forward every spec until the process is interrupted.
pub async fn run_port_forward(ctx: &Context, specs: &[String]) -> Result<()> {
    let specs = parse_specs(specs)?;

    if !ctx.is_remote() && !cfg!(target_os = "linux") {
        return Err(SitectlError::Config(
            "port-forwarding on non-linux local contexts is not currently supported".to_string(),
        ));
    }

    let mut docker = DockerHandle::connect(ctx).await?;
    let result = forward_with(ctx, &docker, &specs).instrument(ctx.span()).await;
    docker.close().await;
    result
}

async fn forward_with(ctx: &Context, docker: &DockerHandle, specs: &[ForwardSpec]) -> Result<()> {
    let dialer: Arc<dyn TunnelDialer> = match docker.ssh() {
        Some(session) => Arc::new(session.clone()),
        None => Arc::new(DirectDialer),
    };

    let mut forwarder = PortForwarder::new(dialer);
    for spec in specs {
        let container = container_name(docker.api(), ctx, &spec.service, false)
            .await?
            .ok_or_else(|| SitectlError::ContainerNotFound {
                service: spec.service.clone(),
                project: ctx.project_name.clone(),
            })?;
        let ip = service_ip(docker.api(), ctx, &container).await?;

        forwarder
            .bind(Forward {
                local_port: spec.local_port,
                remote_host: ip,
                remote_port: spec.remote_port,
            })
            .await?;
    }

    if forwarder.is_empty() {
        return Err(SitectlError::Config("no port forwards given".to_string()));
    }
    forwarder.run_until(shutdown_signal()).await
}
