pub mod commands;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;
use commands::secret::Source;

#[derive(Parser)]
#[command(name = "sitectl")]
#[command(version)]
#[command(about = "Run commands against local or SSH-reachable docker compose sites")]
#[command(long_about = "Run docker compose, container execs and port forwards against a site,\nwhether it lives on this machine or on a remote host reachable over SSH.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Context to run against (defaults to the current context)
    #[arg(long, global = true, env = "SITECTL_CONTEXT")]
    pub context: Option<String>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run docker compose commands in the context's project
    ///
    /// `up` gets `-d --remove-orphans` unless already detached and `build`
    /// gets `--pull`.
    Compose {
        /// Compose subcommand and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Execute a command inside a service's container
    Exec {
        /// Disable pseudo-TTY allocation
        #[arg(short = 'T', long)]
        no_tty: bool,

        /// Run as this user
        #[arg(short, long)]
        user: Option<String>,

        /// Working directory inside the container
        #[arg(short, long)]
        workdir: Option<String>,

        /// Extra environment variables (KEY=value)
        #[arg(short, long)]
        env: Vec<String>,

        /// Compose service name
        service: String,

        /// Command to run (defaults to a shell)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Forward one or more local ports to a service
    ///
    /// Runs until interrupted with Ctrl+C.
    PortForward {
        #[arg(required = true, value_name = "LOCAL-PORT:SERVICE:REMOTE-PORT")]
        specs: Vec<String>,
    },

    /// Print a secret of a service's container
    Secret {
        /// Compose service name
        service: String,

        /// Secret name (file under /run/secrets or environment variable)
        name: String,
    },

    /// Print an environment variable declared on a service's container
    Env {
        /// Compose service name
        service: String,

        /// Variable name
        name: String,
    },

    /// Run the project's make targets in its directory
    Make {
        /// Targets and variables passed to make
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print connection URIs for the context's database
    ///
    /// Remote contexts also get SSH tunnel parameters for GUI clients.
    DbUri,

    /// Inspect the configured contexts
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the resolved context
    Show,
}

impl Cli {
    /// Run the selected command. Returns the process exit code.
    pub async fn execute(self) -> Result<i32> {
        let config = Config::load()?;
        let ctx = config.context(self.context.as_deref())?;
        tracing::debug!(context = %ctx.name, kind = %ctx.kind, "Resolved context");

        match self.command {
            Commands::Compose { args } => {
                commands::compose::execute(&ctx, args).await?;
                Ok(0)
            }
            Commands::Exec {
                no_tty,
                user,
                workdir,
                env,
                service,
                command,
            } => {
                let args = commands::exec::ExecArgs {
                    tty: !no_tty,
                    user,
                    workdir,
                    env,
                    service,
                    command,
                };
                let code = commands::exec::execute(&ctx, args).await?;
                Ok(i32::try_from(code).unwrap_or(1))
            }
            Commands::PortForward { specs } => {
                commands::port_forward::execute(&ctx, specs).await?;
                Ok(0)
            }
            Commands::Secret { service, name } => {
                commands::secret::execute(&ctx, &service, &name, Source::Secret).await?;
                Ok(0)
            }
            Commands::Env { service, name } => {
                commands::secret::execute(&ctx, &service, &name, Source::Env).await?;
                Ok(0)
            }
            Commands::Make { args } => {
                commands::make::execute(&ctx, args).await?;
                Ok(0)
            }
            Commands::DbUri => {
                commands::db_uri::execute(&ctx).await?;
                Ok(0)
            }
            Commands::Config { command } => match command {
                ConfigCommands::Show => {
                    commands::config::show(&ctx).await?;
                    Ok(0)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_args_pass_through() {
        let cli = Cli::parse_from(["sitectl", "--context", "prod", "compose", "logs", "-f", "nginx"]);

        assert_eq!(cli.context.as_deref(), Some("prod"));
        match cli.command {
            Commands::Compose { args } => assert_eq!(args, ["logs", "-f", "nginx"]),
            _ => panic!("expected compose"),
        }
    }

    #[test]
    fn test_exec_flags() {
        let cli = Cli::parse_from([
            "sitectl", "exec", "-T", "--user", "nginx", "drupal", "drush", "cr", "--yes",
        ]);

        match cli.command {
            Commands::Exec {
                no_tty,
                user,
                service,
                command,
                ..
            } => {
                assert!(no_tty);
                assert_eq!(user.as_deref(), Some("nginx"));
                assert_eq!(service, "drupal");
                assert_eq!(command, ["drush", "cr", "--yes"]);
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_secret_and_env_take_service_and_name() {
        let cli = Cli::parse_from(["sitectl", "secret", "mariadb", "DB_ROOT_PASSWORD"]);
        assert!(matches!(cli.command, Commands::Secret { ref service, .. } if service == "mariadb"));

        let cli = Cli::parse_from(["sitectl", "env", "drupal", "DRUPAL_DEFAULT_SITE_URL"]);
        match cli.command {
            Commands::Env { service, name } => {
                assert_eq!(service, "drupal");
                assert_eq!(name, "DRUPAL_DEFAULT_SITE_URL");
            }
            _ => panic!("expected env"),
        }
    }

    #[test]
    fn test_make_and_db_uri() {
        let cli = Cli::parse_from(["sitectl", "make", "reindex", "-j2"]);
        match cli.command {
            Commands::Make { args } => assert_eq!(args, ["reindex", "-j2"]),
            _ => panic!("expected make"),
        }

        let cli = Cli::parse_from(["sitectl", "--context", "prod", "db-uri"]);
        assert!(matches!(cli.command, Commands::DbUri));
    }

    #[test]
    fn test_port_forward_requires_specs() {
        assert!(Cli::try_parse_from(["sitectl", "port-forward"]).is_err());

        let cli = Cli::parse_from(["sitectl", "port-forward", "8983:solr:8983", "3306:mariadb:3306"]);
        match cli.command {
            Commands::PortForward { specs } => assert_eq!(specs.len(), 2),
            _ => panic!("expected port-forward"),
        }
    }
}
