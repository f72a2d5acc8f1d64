// CLI subcommand dispatch.

use clap::Subcommand;

use limpet_daemon::config::DaemonConfig;

pub mod log;
pub mod signal;
pub mod status;
pub mod track;

#[derive(Subcommand)]
pub enum Command {
    /// Start tracking a URL under a doc class
    Track(track::TrackArgs),
    /// Dispatch a downstream task for every document in a doc class
    Signal(signal::SignalArgs),
    /// Show tracking and queue counters
    Status(status::StatusArgs),
    /// Page through the audit log
    Log(log::LogArgs),
}

pub async fn run(command: Command, config: DaemonConfig) -> anyhow::Result<()> {
    match command {
        Command::Track(args) => track::run(args, config),
        Command::Signal(args) => signal::run(args, config).await,
        Command::Status(args) => status::run(args, config),
        Command::Log(args) => log::run(args, config),
    }
}
