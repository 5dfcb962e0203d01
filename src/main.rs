use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use meshtopo::{EventSource, FileSource, Pipeline, Settings, StreamSource};
use meshtopo_model::FileStore;
use meshtopo_window::SystemClock;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "meshtopo")]
#[command(about = "Builds a live service-mesh dependency graph from traces and lifecycle events")]
struct Args {
    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Newline-delimited JSON input events
    #[arg(short, long, default_value = "events.jsonl", conflicts_with = "connect")]
    input: PathBuf,

    /// Read events from a TCP endpoint instead (host:port)
    #[arg(short, long)]
    connect: Option<String>,

    /// Write the model as JSON once the input is drained, then exit
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// Log filter, e.g. "info" or "meshtopo_model=debug"
    #[arg(long)]
    log: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_deref());

    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, settings))
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args, settings: Settings) -> Result<()> {
    let backend = Arc::new(FileStore::new(&settings.store.path));
    let pipeline = Arc::new(Pipeline::new(&settings, backend, Arc::new(SystemClock))?);

    let mut source: Box<dyn EventSource> = match &args.connect {
        Some(addr) => {
            let stream = TcpStream::connect(addr)
                .await
                .with_context(|| format!("failed to connect to {}", addr))?;
            info!(addr = %addr, "connected");
            Box::new(StreamSource::spawn(stream, addr))
        }
        None => Box::new(FileSource::new(&args.input)),
    };
    info!(source = source.description(), "reading events");

    // a replayed file runs on event time alone, so historical traces are
    // not cut short by the wall clock
    let replay = args.export.is_some() && args.connect.is_none();
    let ticker = (!replay).then(|| pipeline.start_ticker(settings.ticker_interval()));

    loop {
        let events = source.poll();
        let drained = events.is_empty();
        for event in events {
            pipeline.ingest(event);
        }
        if source.is_finished() || (replay && drained) {
            break;
        }
        if replay {
            continue;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    if let Some(e) = source.error() {
        warn!(source = source.description(), error = %e, "source reported an error");
    }

    if let Some(ticker) = ticker {
        ticker.stop().await;
    }
    let stats = pipeline.shutdown().await;
    info!(
        spans = stats.spans,
        control_events = stats.control_events,
        traces = stats.traces_applied,
        failed = stats.traces_failed,
        snapshots = stats.snapshots_saved,
        "done"
    );

    if let Some(path) = &args.export {
        export_to_file(&pipeline, path)?;
        info!(path = %path.display(), "model exported");
    }
    Ok(())
}

fn export_to_file(pipeline: &Pipeline, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &pipeline.export())
        .context("writing model export")?;
    Ok(())
}
