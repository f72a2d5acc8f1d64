// limpetd: proactive document cache daemon entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use limpet_daemon::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "limpetd", about = "Proactive document cache daemon")]
struct Args {
    /// Config file path (defaults to ~/.limpet/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DaemonConfig::load_from(path)
            .with_context(|| format!("failed to load config from `{}`", path.display()))?,
        None => DaemonConfig::load(),
    };

    info!("starting limpet daemon");
    limpet_daemon::runtime::run(config).await.context("daemon terminated unexpectedly")
}
