use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SitectlError};
use crate::ssh::{SftpClient, SshSession};

/// Where the compose project of a context runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    #[default]
    Local,
    Remote,
}

impl std::fmt::Display for HostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostKind::Local => write!(f, "local"),
            HostKind::Remote => write!(f, "remote"),
        }
    }
}

/// A resolved docker compose deployment target.
///
/// Built once per invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Context {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: HostKind,

    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,

    #[serde(default = "default_project_name")]
    pub project_name: String,

    #[serde(default)]
    pub project_dir: String,

    #[serde(default)]
    pub ssh_user: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_hostname: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(rename = "ssh-key", default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_path: String,

    #[serde(rename = "sudo", default)]
    pub run_sudo: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compose_file: Vec<String>,

    /// Compose service running the site database.
    #[serde(default = "default_database_service")]
    pub database_service: String,

    #[serde(default = "default_database_user")]
    pub database_user: String,

    /// Secret holding the database user's password.
    #[serde(default = "default_database_password_secret")]
    pub database_password_secret: String,

    #[serde(default = "default_database_name")]
    pub database_name: String,
}

fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_project_name() -> String {
    "docker-compose".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_database_service() -> String {
    "mariadb".to_string()
}

fn default_database_user() -> String {
    "root".to_string()
}

fn default_database_password_secret() -> String {
    "DB_ROOT_PASSWORD".to_string()
}

fn default_database_name() -> String {
    "drupal_default".to_string()
}

/// Fully populated SSH coordinates of a remote context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub hostname: String,
    pub port: u16,
    pub key_path: PathBuf,
}

impl SshTarget {
    /// `host:port` as used for dialing.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// known_hosts is looked up next to the private key.
    pub fn known_hosts_path(&self) -> PathBuf {
        self.key_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("known_hosts")
    }
}

impl Context {
    /// Create a local context rooted at `project_dir`.
    pub fn local(name: impl Into<String>, project_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HostKind::Local,
            docker_socket: default_docker_socket(),
            project_name: default_project_name(),
            project_dir: project_dir.into(),
            ssh_user: String::new(),
            ssh_hostname: String::new(),
            ssh_port: default_ssh_port(),
            ssh_key_path: String::new(),
            run_sudo: false,
            profile: None,
            env_file: Vec::new(),
            compose_file: Vec::new(),
            database_service: default_database_service(),
            database_user: default_database_user(),
            database_password_secret: default_database_password_secret(),
            database_name: default_database_name(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.kind == HostKind::Remote
    }

    /// Check the invariants a context must hold before anything dials it.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            HostKind::Local => {
                if self.docker_socket.trim().is_empty() {
                    return Err(SitectlError::Config(format!(
                        "Local context '{}' has no docker socket configured",
                        self.name
                    )));
                }
            }
            HostKind::Remote => {
                self.ssh_target()?;
            }
        }
        Ok(())
    }

    /// SSH coordinates for a remote context; errors name the missing field.
    pub fn ssh_target(&self) -> Result<SshTarget> {
        let missing = [
            ("ssh-user", self.ssh_user.is_empty()),
            ("ssh-hostname", self.ssh_hostname.is_empty()),
            ("ssh-port", self.ssh_port == 0),
            ("ssh-key", self.ssh_key_path.is_empty()),
        ]
        .into_iter()
        .filter_map(|(field, empty)| empty.then_some(field))
        .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(SitectlError::Config(format!(
                "Remote context '{}' is missing: {}",
                self.name,
                missing.join(", ")
            )));
        }

        Ok(SshTarget {
            user: self.ssh_user.clone(),
            hostname: self.ssh_hostname.clone(),
            port: self.ssh_port,
            key_path: PathBuf::from(shellexpand::tilde(&self.ssh_key_path).as_ref()),
        })
    }

    /// Project directory with `~` expanded, `None` when unset.
    pub fn project_dir(&self) -> Option<PathBuf> {
        if self.project_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(shellexpand::tilde(&self.project_dir).as_ref()))
        }
    }

    /// SSH tunnel parameters for database GUI clients, `None` for local contexts.
    ///
    /// Does not require a complete remote context: missing fields come out empty.
    pub fn ssh_uri(&self) -> Option<String> {
        if !self.is_remote() {
            return None;
        }

        let port = if self.ssh_port == 0 { 22 } else { self.ssh_port };
        let mut uri = format!(
            "sshHost={}&sshUser={}&sshPort={}",
            self.ssh_hostname, self.ssh_user, port
        );
        if !self.ssh_key_path.is_empty() {
            uri.push_str("&sshKeyFile=");
            uri.push_str(&self.ssh_key_path);
        }
        Some(uri)
    }

    /// Name of the compose project's default network.
    pub fn default_network(&self) -> String {
        format!("{}_default", self.project_name)
    }

    /// Span every component of this invocation logs under.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("context", context = %self.name, kind = %self.kind)
    }
}

/// Reads small text files (secrets, env files) wherever the context lives.
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read_small_file(&self, path: &Path) -> Result<String>;
}

#[async_trait]
impl FileReader for Context {
    async fn read_small_file(&self, path: &Path) -> Result<String> {
        if !self.is_remote() {
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|source| SitectlError::FileRead {
                    path: path.to_path_buf(),
                    source,
                });
        }

        let session = SshSession::dial(self).await?;
        let result = async {
            let sftp = SftpClient::new(&session).await?;
            sftp.read_to_string(path).await
        }
        .await;
        session.close().await;
        result
    }
}

/// The persisted list of contexts (`~/.sitectl/config.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub current_context: String,

    #[serde(default)]
    pub contexts: Vec<Context>,
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SitectlError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".sitectl").join("config.yaml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SitectlError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|source| SitectlError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| SitectlError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Resolve a context by name; `None` or `"default"` means the current one.
    pub fn context(&self, name: Option<&str>) -> Result<Context> {
        let name = match name {
            None | Some("default") | Some("") => self.current_context.as_str(),
            Some(name) => name,
        };

        if name.is_empty() {
            return Err(SitectlError::Config(
                "No current context set (current-context is empty)".to_string(),
            ));
        }

        let context = self
            .contexts
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| SitectlError::Config(format!("Unknown context '{}'", name)))?;

        context.validate()?;
        Ok(context)
    }
}
