//! Event outbox binary entry point.
//!
//! Usage: event-outbox --collector <url> [--input <file>]
//!        event-outbox --list-queues
//!
//! Reads newline-delimited JSON events (stdin by default), queues each one
//! and flushes the queue before exiting. Events that could not be delivered
//! stay in the durable store and go out on the next run.

use anyhow::Context;
use clap::Parser;
use event_outbox::{
    EnqueueOutcome, EventFields, FlushRegistry, HttpTransport, OutboundQueue, OutboxConfig,
    TransportMode, Transports,
};
use outbox_storage::{KeyValueStore, StorageKeys};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Event outbox: durable, batching sender for tracker events.
#[derive(Parser, Debug)]
#[command(name = "event-outbox")]
#[command(about = "Queue tracker events durably and deliver them to a collector")]
struct Args {
    /// Collector base URL.
    #[arg(long, env = "OUTBOX_COLLECTOR_URL", required_unless_present = "list_queues")]
    collector: Option<String>,

    /// Print the stored queue records for the product and exit.
    #[arg(long)]
    list_queues: bool,

    /// File with one JSON event per line. Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// JSON config file.
    #[arg(long, env = "OUTBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Tracker namespace.
    #[arg(long)]
    namespace: Option<String>,

    /// Product identifier used in storage keys.
    #[arg(long)]
    product: Option<String>,

    /// Transport mode (batch, beacon).
    #[arg(long)]
    mode: Option<TransportMode>,

    /// Directory for durable queue records.
    #[arg(long, env = "OUTBOX_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Keep the queue in memory only.
    #[arg(long)]
    no_store: bool,

    /// Entries to buffer before draining.
    #[arg(long)]
    flush_threshold: Option<usize>,

    /// Byte budget for one batch.
    #[arg(long)]
    max_payload_bytes: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write JSONL logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn build_config(args: &Args) -> anyhow::Result<OutboxConfig> {
    let mut config = match &args.config {
        Some(path) => OutboxConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => OutboxConfig::new(),
    };

    // CLI flags win over file and environment.
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(product) = &args.product {
        config.product = product.clone();
    }
    if let Some(mode) = args.mode {
        config.transport_mode = mode;
    }
    if let Some(threshold) = args.flush_threshold {
        config.flush_threshold = threshold;
    }
    if let Some(bytes) = args.max_payload_bytes {
        config.max_payload_bytes = bytes;
    }
    if args.no_store {
        config.use_durable_store = false;
    }

    Ok(config)
}

fn open_storage(
    args: &Args,
    config: &OutboxConfig,
) -> anyhow::Result<Option<Arc<dyn KeyValueStore>>> {
    if !config.use_durable_store {
        return Ok(None);
    }
    let dir = match &args.store_dir {
        Some(dir) => dir.clone(),
        None => outbox_storage::default_storage_dir()?,
    };
    let storage = outbox_storage::create_storage(&dir)
        .with_context(|| format!("failed to open queue store at {}", dir.display()))?;
    info!(dir = %dir.display(), "Opened queue store");
    Ok(Some(Arc::from(storage)))
}

/// Queue every event read from `reader`. Returns (queued, skipped).
async fn pump<R>(
    reader: R,
    queue: &OutboundQueue,
    collector: &str,
) -> anyhow::Result<(usize, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;
    let mut skipped = 0;
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: EventFields = match serde_json::from_str(line) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping line that is not a JSON object");
                skipped += 1;
                continue;
            }
        };

        match queue.enqueue(&fields, collector).await? {
            EnqueueOutcome::Queued { .. } => queued += 1,
            EnqueueOutcome::Oversized { .. } => skipped += 1,
        }
    }

    Ok((queued, skipped))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "event-outbox".into(),
        default_level: args.log_level.clone(),
        log_path: args.log_file.clone(),
        also_stderr: true,
    })
    .context("failed to initialize logging")?;

    let config = build_config(&args)?;
    info!(
        product = %config.product,
        namespace = %config.namespace,
        mode = %config.transport_mode,
        flush_threshold = config.flush_threshold,
        max_payload_bytes = config.max_payload_bytes,
        durable = config.use_durable_store,
        "Configuration loaded"
    );

    let storage = open_storage(&args, &config)?;

    if args.list_queues {
        let keys = match &storage {
            Some(storage) => {
                storage.list_keys_with_prefix(&StorageKeys::queue_prefix(&config.product))?
            }
            None => Vec::new(),
        };
        for key in keys {
            println!("{}", key);
        }
        return Ok(());
    }
    let collector = args
        .collector
        .clone()
        .context("--collector is required")?;

    let transports = Transports::http(HttpTransport::with_headers(&config.custom_headers)?);
    let registry = Arc::new(FlushRegistry::new());
    let queue = OutboundQueue::new(&config, storage, transports, registry.as_ref());
    queue.set_collector_url(&collector).await?;

    let restored = queue.len().await;
    if restored > 0 {
        info!(count = restored, "Draining events left by a previous run");
        queue.drain_now().await?;
    }

    let run = async {
        let (queued, skipped) = match &args.input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                pump(BufReader::new(file), &queue, &collector).await?
            }
            None => pump(BufReader::new(tokio::io::stdin()), &queue, &collector).await?,
        };
        info!(queued = queued, skipped = skipped, "Input exhausted");

        registry.flush_all().await;
        queue.wait_idle().await;
        anyhow::Ok(())
    };

    tokio::select! {
        result = run => {
            if let Err(e) = result {
                error!(error = %e, "Event outbox exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting...");
        }
    }

    let remaining = queue.len().await;
    if remaining > 0 {
        warn!(remaining = remaining, "Events left queued for the next run");
    }
    println!("{}", remaining);

    Ok(())
}
