use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::exec::CreateExecOptions;
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use bollard::{Docker, API_DEFAULT_VERSION};

use super::{attach, AttachedExec, DockerApi};
use crate::error::{Result, SitectlError};

/// Request timeout for daemon calls, in seconds.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// [`DockerApi`] backed by bollard on a unix socket.
pub struct BollardApi {
    docker: Docker,
    socket: PathBuf,
    api_version: String,
}

impl BollardApi {
    /// Connect to `socket` and negotiate the API version with the daemon.
    pub async fn connect(socket: &Path) -> Result<Self> {
        let addr = socket.to_string_lossy().into_owned();

        let docker = Docker::connect_with_unix(&addr, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)
            .map_err(|e| SitectlError::docker("connect", addr.as_str(), e))?
            .negotiate_version()
            .await
            .map_err(|e| SitectlError::docker("negotiate version", addr.as_str(), e))?;

        let version = docker.client_version();
        let api_version = format!("{}.{}", version.major_version, version.minor_version);
        tracing::debug!(socket = %addr, api_version = %api_version, "Docker API negotiated");

        Ok(Self {
            docker,
            socket: socket.to_path_buf(),
            api_version,
        })
    }
}

#[async_trait]
impl DockerApi for BollardApi {
    async fn inspect_container(&self, container: &str) -> Result<ContainerInspectResponse> {
        self.docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| SitectlError::docker("inspect container", container, e))
    }

    async fn list_containers(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerSummary>> {
        let target = format!("{:?}", filters);
        let options = ListContainersOptions::<String> {
            filters,
            ..Default::default()
        };
        self.docker
            .list_containers(Some(options))
            .await
            .map_err(|e| SitectlError::docker("list containers", target, e))
    }

    async fn create_exec(
        &self,
        container: &str,
        config: CreateExecOptions<String>,
    ) -> Result<String> {
        let created = self
            .docker
            .create_exec(container, config)
            .await
            .map_err(|e| SitectlError::docker("create exec", container, e))?;
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<AttachedExec> {
        attach::start_exec(&self.socket, &self.api_version, exec_id, tty).await
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspected = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| SitectlError::docker("inspect exec", exec_id, e))?;
        Ok(inspected.exit_code)
    }
}
