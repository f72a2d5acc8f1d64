// `limpet status` — tracking and queue counters.

use chrono::Utc;
use clap::Args;

use limpet_daemon::config::DaemonConfig;
use limpet_daemon::store::status::StatusStore;
use limpet_daemon::store::tracked::TrackedStore;
use limpet_daemon::store::MetaDb;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Reset a stuck in-flight counter (after a worker crash).
    #[arg(long)]
    pub reset_in_flight: bool,
}

pub fn run(args: StatusArgs, config: DaemonConfig) -> anyhow::Result<()> {
    let db = MetaDb::open(config.db_path())?;

    if args.reset_in_flight {
        StatusStore::reset(db.connection())?;
        println!("in-flight counter reset");
    }

    let now = Utc::now();
    println!("tracking:    {}", TrackedStore::count(db.connection())?);
    println!("need update: {}", TrackedStore::due_count(db.connection(), now)?);
    println!("in flight:   {}", StatusStore::in_flight(db.connection())?);
    Ok(())
}
