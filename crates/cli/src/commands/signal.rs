// `limpet signal` — dispatch a downstream task for every versioned
// document in a doc class.

use anyhow::Context;
use clap::Args;

use limpet_daemon::config::DaemonConfig;
use limpet_daemon::notify::{self, ChangeEvent};
use limpet_daemon::runtime;
use limpet_daemon::store::tracked::TrackedStore;
use limpet_daemon::store::MetaDb;

const SAMPLE_LIMIT: u32 = 100;

#[derive(Debug, Args)]
pub struct SignalArgs {
    /// Downstream task name (must be a registered handler).
    pub task: String,
    /// Doc class to enumerate.
    pub doc_class: String,
    /// Limit to 100 random documents (implies inline execution).
    #[arg(long)]
    pub sample: bool,
    /// Run handlers inline instead of through the dispatcher.
    #[arg(long)]
    pub immediate: bool,
}

pub async fn run(args: SignalArgs, config: DaemonConfig) -> anyhow::Result<()> {
    let handlers = runtime::builtin_handlers();
    let db = MetaDb::open(config.db_path())?;

    let sample = args.sample.then_some(SAMPLE_LIMIT);
    let docs = TrackedStore::in_class_with_versions(db.connection(), &args.doc_class, sample)?;
    println!("{} documents in {}", docs.len(), args.doc_class);
    if args.sample {
        println!("sampling up to {SAMPLE_LIMIT} documents");
    }

    if args.immediate || args.sample {
        let handler = handlers
            .get(&args.task)
            .with_context(|| format!("no handler registered for task `{}`", args.task))?;

        let mut errors = 0;
        for doc in &docs {
            let event = ChangeEvent { task: args.task.clone(), doc_id: doc.id.clone() };
            if let Err(error) = handler(&event) {
                errors += 1;
                eprintln!("error running `{}` for {}: {error:#}", args.task, doc.id);
            }
        }
        println!("{errors} errors in {} documents", docs.len());
    } else {
        // Post through the at-least-once channel and drain it inline.
        let (sender, dispatcher) = notify::channel(handlers);
        for doc in &docs {
            sender.dispatch(&args.task, &doc.id);
        }
        drop(sender);
        dispatcher.run().await;
    }

    Ok(())
}
