// `limpet log` — page through the audit ring, newest first.

use clap::Args;

use limpet_daemon::config::DaemonConfig;
use limpet_daemon::store::logs::LogStore;
use limpet_daemon::store::MetaDb;

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Entries to skip from the newest end.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,
    /// Page size.
    #[arg(long, default_value_t = 100)]
    pub limit: u64,
}

pub fn run(args: LogArgs, config: DaemonConfig) -> anyhow::Result<()> {
    let db = MetaDb::open(config.db_path())?;

    for entry in LogStore::page(db.connection(), args.offset, args.limit)? {
        let status = entry.error.as_deref().unwrap_or("ok");
        println!("{}  {:<7} {}  {}", entry.timestamp.to_rfc3339(), entry.action, entry.url, status);
    }
    Ok(())
}
