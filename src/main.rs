mod cli;
mod config;
mod docker;
mod error;
mod forward;
mod runner;
mod ssh;
mod terminal;

use clap::Parser;
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level / LOG_LEVEL.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sitectl={}", cli.log_level).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    let code = match cli.execute().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            1
        }
    };

    // Exit without waiting on runtime shutdown: a blocking stdin read may still be parked.
    std::process::exit(code);
}
