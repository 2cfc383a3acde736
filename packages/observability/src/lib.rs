//! # Observability
//!
//! Logging setup for event-outbox binaries.
//!
//! Library code only uses `tracing` macros. A binary calls
//! [`init_with_config`] once at startup to decide where those events go:
//!
//! - with a `log_path`: one JSON object per line appended to that file, plus
//!   compact stderr output when `also_stderr` is set
//! - without one: compact stderr output only
//!
//! `RUST_LOG` overrides `default_level` in both cases.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "event-outbox".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/tmp/outbox.jsonl".into()),
//!     also_stderr: true,
//! })?;
//! ```

mod file;
mod json_layer;

pub use file::{AppendWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogRecord};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every JSONL record.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info,event_outbox=trace").
    /// Overridden by `RUST_LOG`.
    pub default_level: String,

    /// Append JSONL records to this file.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr when writing to a file.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) -> io::Result<()> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging.
///
/// Fails only when the log file cannot be opened. A second call in the same
/// process leaves the first subscriber in place.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let Some(log_path) = config.log_path.clone() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter(&config.default_level))
            .with_target(true)
            .with_writer(io::stderr)
            .compact()
            .try_init();
        return Ok(());
    };

    let writer = AppendWriter::new(&log_path)?;
    let json_layer = JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let _ = tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init();

    tracing::debug!(log_path = %log_path.display(), "observability initialized");
    Ok(())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub use tracing::{debug, error, info, trace, warn, Level};
