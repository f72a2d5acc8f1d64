// limpet CLI entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use limpet_daemon::config::DaemonConfig;

mod commands;

#[derive(Parser)]
#[command(name = "limpet", about = "Proactive document cache")]
struct Cli {
    /// Config file path (defaults to ~/.limpet/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DaemonConfig::load_from(path)
            .with_context(|| format!("failed to load config from `{}`", path.display()))?,
        None => DaemonConfig::load(),
    };
    commands::run(cli.command, config).await
}
