// `limpet track` — start tracking a URL under a doc class.

use anyhow::Context;
use clap::Args;

use limpet_common::Metadata;
use limpet_daemon::config::DaemonConfig;
use limpet_daemon::kernel::Kernel;
use limpet_daemon::runtime;

#[derive(Debug, Args)]
pub struct TrackArgs {
    /// URL to start tracking.
    pub url: String,
    /// Doc class the document belongs to.
    pub doc_class: String,
    /// Explicit document id (defaults to a generated one).
    #[arg(long)]
    pub id: Option<String>,
    /// Metadata entries as key=value; values parse as JSON when they
    /// can, and fall back to plain strings.
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub meta: Vec<String>,
}

pub fn run(args: TrackArgs, config: DaemonConfig) -> anyhow::Result<()> {
    let (ctx, _dispatcher) = runtime::build_context(&config, runtime::builtin_handlers())?;
    let mut kernel = Kernel::open(&config, ctx)?;

    let metadata = parse_meta(&args.meta)?;
    let id = kernel.track(&args.url, &args.doc_class, args.id.as_deref(), metadata)?;
    println!("{id}");
    Ok(())
}

fn parse_meta(entries: &[String]) -> anyhow::Result<Metadata> {
    let mut metadata = Metadata::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("metadata entry `{entry}` is not key=value"))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}
