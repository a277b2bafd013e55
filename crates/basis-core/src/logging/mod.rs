//! Logging: a rotating file sink fed by `tracing`.
//!
//! Components log with `tracing` macros and a category target
//! (`tracing::debug!(target: PROGRAM, ...)`). [`init`] installs a subscriber
//! whose only writer is the [`RotatingLogSink`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{config::Config, errors::Error, reporting::ErrorReporter, Result};

mod layer;
mod sink;

pub use layer::SinkLayer;
pub use sink::{Clock, LogFs, LogRecord, RotatingLogSink, StdFs, SystemClock, RETENTION_DAYS};

/// Category for the bot's own lifecycle and command handling.
pub const PROGRAM: &str = "Program";
/// Category for events coming from the chat transport.
pub const DISCORD: &str = "Discord";
/// Category for error-tracker diagnostics.
pub const SENTRY: &str = "Sentry";

/// Ordered log severity. `None` disables output entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
    None,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Information => "INFORMATION",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::None => "NONE",
        }
    }

    /// Case-insensitive parse; accepts the short `info` / `warn` spellings too.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "trace" => Some(Severity::Trace),
            "debug" => Some(Severity::Debug),
            "information" | "info" => Some(Severity::Information),
            "warning" | "warn" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "critical" => Some(Severity::Critical),
            "none" => Some(Severity::None),
            _ => None,
        }
    }

    /// Whether a record at `severity` passes this minimum.
    pub fn allows(self, severity: Severity) -> bool {
        self != Severity::None && severity != Severity::None && severity >= self
    }
}

/// Switch that routes transport-library events into the sink.
///
/// Shared between the logging layer and the transport adapter; shutdown
/// detaches it before closing the connection.
#[derive(Clone, Debug)]
pub struct LogHook(Arc<AtomicBool>);

impl LogHook {
    pub fn attached() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn detach(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_attached(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install the global subscriber and return the transport hook.
///
/// `RUST_LOG`, when set, narrows what reaches the sink on top of the
/// configured minimum severity.
pub fn init(cfg: &Config, reporter: Arc<dyn ErrorReporter>) -> Result<LogHook> {
    let sink = Arc::new(RotatingLogSink::new(
        &cfg.log_dir,
        &cfg.bot_name,
        cfg.min_severity,
        reporter,
    ));
    let hook = LogHook::attached();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().ok())
        .with(SinkLayer::new(sink, hook.clone()))
        .try_init()
        .map_err(|e| Error::External(format!("failed to install logger: {e}")))?;

    Ok(hook)
}
