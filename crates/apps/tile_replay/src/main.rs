mod replay;
mod script;
mod sink;
mod source;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use streaming::{Stream, StreamingConfig};
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::replay::Replay;
use crate::script::Script;
use crate::source::{DataSource, FilesystemSource, HttpSource};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay viewport scripts against the tile cache")]
struct Args {
    /// Streaming config (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Viewport script (JSON)
    #[arg(long)]
    script: PathBuf,

    /// Override the script's settle timeout, in milliseconds
    #[arg(long)]
    settle_timeout_ms: Option<u64>,

    #[command(subcommand)]
    source: SourceArgs,
}

#[derive(Subcommand, Debug)]
enum SourceArgs {
    /// Read tiles from a level/x/y directory tree
    Dir {
        root: PathBuf,

        /// Tile file extension
        #[arg(long, default_value = "pbf")]
        ext: String,
    },

    /// Fetch tiles over HTTP
    Http {
        /// URL template with {z} (or {level}), {x} and {y}
        template: String,

        /// URL template for the label stream
        #[arg(long)]
        labels: Option<String>,
    },
}

impl SourceArgs {
    fn build(self) -> Arc<dyn DataSource> {
        match self {
            SourceArgs::Dir { root, ext } => Arc::new(FilesystemSource::new(root, ext)),
            SourceArgs::Http { template, labels } => {
                let source = HttpSource::new(template);
                match labels {
                    Some(labels) => Arc::new(source.with_labels(labels)),
                    None => Arc::new(source),
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => StreamingConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => StreamingConfig::default(),
    };
    let script = Script::load(&args.script)?;
    let source = args.source.build();

    if (config.tiles.labels_enabled || script.enables_labels()) && !source.supports(Stream::Labels) {
        return Err(format!("{} has no label stream but labels are enabled", source.name()).into());
    }

    let settle_timeout =
        Duration::from_millis(args.settle_timeout_ms.unwrap_or(script.settle_timeout_ms));
    info!(
        source = source.name(),
        steps = script.steps.len(),
        "starting replay"
    );

    let mut replay = Replay::new(config.tiles, source, Handle::current(), settle_timeout)?;
    let summary = replay.run(&script).await;
    info!(
        resident = replay.cache().len(),
        stats = ?replay.cache().stats().snapshot(),
        "replay finished"
    );

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
