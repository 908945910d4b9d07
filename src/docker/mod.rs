//! Docker bridge: one API handle per context, local socket or tunneled over SSH.
//!
//! Everything above this module talks to the daemon through [`DockerApi`],
//! the narrow set of calls the tool actually needs.

mod api;
mod attach;
mod compose;
mod demux;
mod exec;
mod proxy;
mod socket;

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::exec::CreateExecOptions;
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;

use crate::config::Context;
use crate::error::Result;
use crate::ssh::SshSession;

pub use api::BollardApi;
pub use compose::{config_env, container_name, database_uris, secret, service_ip, DatabaseUris};
pub use demux::demux;
pub use exec::{exec_interactive, exec_simple, ExecOptions};
pub use proxy::SocketProxy;
pub use socket::{resolve_local_socket, strip_unix_scheme};

/// The two halves of an attached exec session.
pub struct AttachedExec {
    /// Raw stream: framed unless the exec has a TTY.
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
}

/// Daemon calls used by the bridge.
#[async_trait]
pub trait DockerApi: Send + Sync {
    async fn inspect_container(&self, container: &str) -> Result<ContainerInspectResponse>;

    async fn list_containers(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerSummary>>;

    /// Returns the exec id.
    async fn create_exec(&self, container: &str, config: CreateExecOptions<String>)
        -> Result<String>;

    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<AttachedExec>;

    /// Exit code of a finished exec; `None` while it is still running.
    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>>;
}

/// A negotiated Docker API client plus whatever keeps its transport alive.
pub struct DockerHandle {
    api: BollardApi,
    ssh: Option<SshSession>,
    proxy: Option<SocketProxy>,
}

impl DockerHandle {
    /// Connect to the daemon of `ctx`. Remote contexts dial SSH first.
    pub async fn connect(ctx: &Context) -> Result<Self> {
        async {
            if !ctx.is_remote() {
                let socket = resolve_local_socket(&ctx.docker_socket).await?;
                tracing::debug!(socket = %socket.display(), "Connecting to local docker");
                let api = BollardApi::connect(&socket).await?;
                return Ok(Self {
                    api,
                    ssh: None,
                    proxy: None,
                });
            }

            let session = SshSession::dial(ctx).await?;
            match Self::connect_tunneled(&session, &ctx.docker_socket).await {
                Ok((api, proxy)) => Ok(Self {
                    api,
                    ssh: Some(session),
                    proxy: Some(proxy),
                }),
                Err(e) => {
                    session.close().await;
                    Err(e)
                }
            }
        }
        .instrument(ctx.span())
        .await
    }

    async fn connect_tunneled(
        session: &SshSession,
        remote_socket: &str,
    ) -> Result<(BollardApi, SocketProxy)> {
        let remote_socket = strip_unix_scheme(remote_socket);
        let proxy = SocketProxy::start(session.clone(), remote_socket)?;
        tracing::debug!(
            remote = %remote_socket,
            local = %proxy.path().display(),
            "Tunneling docker socket over SSH"
        );
        let api = BollardApi::connect(proxy.path()).await?;
        Ok((api, proxy))
    }

    pub fn api(&self) -> &dyn DockerApi {
        &self.api
    }

    /// The SSH connection behind a remote handle.
    pub fn ssh(&self) -> Option<&SshSession> {
        self.ssh.as_ref()
    }

    /// Stop the socket proxy and disconnect SSH. Safe to call more than once.
    pub async fn close(&mut self) {
        self.proxy.take();
        if let Some(ssh) = &self.ssh {
            ssh.close().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use bollard::models::{EndpointSettings, MountPoint, NetworkSettings};

    use super::compose::{PROJECT_LABEL, SERVICE_LABEL};
    use super::*;
    use crate::error::SitectlError;

    /// In-memory daemon: a fixed set of containers and one scripted exec result.
    #[derive(Default)]
    pub struct FakeDocker {
        pub containers: Vec<(ContainerSummary, ContainerInspectResponse)>,
        pub exec_output: Vec<u8>,
        pub exec_exit_code: Option<i64>,
        pub created: Mutex<Vec<(String, CreateExecOptions<String>)>>,
        pub stdin_received: std::sync::Arc<Mutex<Vec<u8>>>,
    }

    impl FakeDocker {
        pub fn with_container(mut self, container: FakeContainer) -> Self {
            self.containers.push(container.build());
            self
        }
    }

    /// Builder for one container known to [`FakeDocker`].
    pub struct FakeContainer {
        name: String,
        labels: HashMap<String, String>,
        env: Vec<String>,
        mounts: Vec<MountPoint>,
        networks: HashMap<String, EndpointSettings>,
    }

    impl FakeContainer {
        pub fn new(project: &str, service: &str, name: &str) -> Self {
            let labels = HashMap::from([
                (PROJECT_LABEL.to_string(), project.to_string()),
                (SERVICE_LABEL.to_string(), service.to_string()),
            ]);
            Self {
                name: name.to_string(),
                labels,
                env: Vec::new(),
                mounts: Vec::new(),
                networks: HashMap::new(),
            }
        }

        pub fn env(mut self, entry: &str) -> Self {
            self.env.push(entry.to_string());
            self
        }

        pub fn mount(mut self, source: &str, destination: &str) -> Self {
            self.mounts.push(MountPoint {
                source: Some(source.to_string()),
                destination: Some(destination.to_string()),
                ..Default::default()
            });
            self
        }

        pub fn network(mut self, network: &str, ip: &str) -> Self {
            self.networks.insert(
                network.to_string(),
                EndpointSettings {
                    ip_address: Some(ip.to_string()),
                    ..Default::default()
                },
            );
            self
        }

        fn build(self) -> (ContainerSummary, ContainerInspectResponse) {
            let summary = ContainerSummary {
                names: Some(vec![format!("/{}", self.name)]),
                labels: Some(self.labels),
                ..Default::default()
            };
            let inspect = ContainerInspectResponse {
                name: Some(format!("/{}", self.name)),
                config: Some(bollard::models::ContainerConfig {
                    env: Some(self.env),
                    ..Default::default()
                }),
                mounts: Some(self.mounts),
                network_settings: Some(NetworkSettings {
                    networks: Some(self.networks),
                    ..Default::default()
                }),
                ..Default::default()
            };
            (summary, inspect)
        }
    }

    fn matches_filters(summary: &ContainerSummary, filters: &HashMap<String, Vec<String>>) -> bool {
        let labels = summary.labels.clone().unwrap_or_default();
        filters.get("label").into_iter().flatten().all(|filter| {
            match filter.split_once('=') {
                Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
                None => labels.contains_key(filter.as_str()),
            }
        })
    }

    #[async_trait]
    impl DockerApi for FakeDocker {
        async fn inspect_container(&self, container: &str) -> Result<ContainerInspectResponse> {
            let wanted = format!("/{}", container.trim_start_matches('/'));
            self.containers
                .iter()
                .find(|(_, inspect)| inspect.name.as_deref() == Some(wanted.as_str()))
                .map(|(_, inspect)| inspect.clone())
                .ok_or_else(|| {
                    SitectlError::docker(
                        "inspect container",
                        container,
                        bollard::errors::Error::DockerResponseServerError {
                            status_code: 404,
                            message: format!("No such container: {}", container),
                        },
                    )
                })
        }

        async fn list_containers(
            &self,
            filters: HashMap<String, Vec<String>>,
        ) -> Result<Vec<ContainerSummary>> {
            Ok(self
                .containers
                .iter()
                .filter(|(summary, _)| matches_filters(summary, &filters))
                .map(|(summary, _)| summary.clone())
                .collect())
        }

        async fn create_exec(
            &self,
            container: &str,
            config: CreateExecOptions<String>,
        ) -> Result<String> {
            let mut created = self.created.lock().unwrap();
            created.push((container.to_string(), config));
            Ok(format!("exec-{}", created.len()))
        }

        async fn start_exec(&self, _exec_id: &str, _tty: bool) -> Result<AttachedExec> {
            let (input, mut collector) = tokio::io::duplex(1024);
            let received = self.stdin_received.clone();
            tokio::spawn(async move {
                use tokio::io::AsyncReadExt;
                let mut buf = Vec::new();
                let _ = collector.read_to_end(&mut buf).await;
                received.lock().unwrap().extend(buf);
            });
            Ok(AttachedExec {
                output: Box::new(std::io::Cursor::new(self.exec_output.clone())),
                input: Box::new(input),
            })
        }

        async fn inspect_exec(&self, _exec_id: &str) -> Result<Option<i64>> {
            Ok(self.exec_exit_code)
        }
    }
}
