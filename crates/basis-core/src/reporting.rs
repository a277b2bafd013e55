//! Error-tracker hook.
//!
//! Components call [`ErrorReporter::capture`] for recovered I/O failures. The
//! reporter must never log through `tracing`: it is called from inside the log
//! sink, and a log event there would recurse into the sink.

use std::sync::Arc;

use serde::Serialize;

use crate::{config::Config, errors::Error, utils::iso_timestamp_utc, Result};

const SENTRY_CLIENT: &str = concat!("basis/", env!("CARGO_PKG_VERSION"));

pub trait ErrorReporter: Send + Sync {
    fn capture(&self, context: &str, error: &dyn std::fmt::Display);

    /// Where captured errors end up, for the startup log.
    fn destination(&self) -> String {
        "stderr".to_string()
    }
}

/// Writes captured errors to stderr. Used when no tracker endpoint is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleReporter;

impl ErrorReporter for ConsoleReporter {
    fn capture(&self, context: &str, error: &dyn std::fmt::Display) {
        eprintln!("[error-tracker] {context}: {error}");
    }
}

/// A Sentry DSN split into the store endpoint and the auth credentials.
///
/// `https://<key>[:<secret>]@<host>[/<prefix>]/<project>` posts to
/// `https://<host>[/<prefix>]/api/<project>/store/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentryDsn {
    public_key: String,
    secret_key: Option<String>,
    store_url: String,
}

impl SentryDsn {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Config(format!("invalid SENTRY_DSN: {reason}"));

        let url = reqwest::Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
        if url.username().is_empty() {
            return Err(invalid("missing public key"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;

        let mut segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let project = segments.pop().ok_or_else(|| invalid("missing project id"))?;

        let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
        let prefix: String = segments.iter().map(|s| format!("/{s}")).collect();

        Ok(Self {
            public_key: url.username().to_string(),
            secret_key: url.password().map(str::to_string),
            store_url: format!("{}://{host}{port}{prefix}/api/{project}/store/", url.scheme()),
        })
    }

    pub fn store_url(&self) -> &str {
        &self.store_url
    }

    /// Value of the `X-Sentry-Auth` header.
    pub fn auth_header(&self) -> String {
        let mut header = format!(
            "Sentry sentry_version=7, sentry_client={SENTRY_CLIENT}, sentry_key={}",
            self.public_key
        );
        if let Some(secret) = &self.secret_key {
            header.push_str(&format!(", sentry_secret={secret}"));
        }
        header
    }
}

#[derive(Clone, Debug, Serialize)]
struct EventTags {
    context: String,
}

#[derive(Clone, Debug, Serialize)]
struct ErrorEvent {
    timestamp: String,
    level: &'static str,
    logger: &'static str,
    platform: &'static str,
    message: String,
    release: String,
    environment: String,
    tags: EventTags,
}

/// Posts captured errors to the Sentry store endpoint.
///
/// Delivery is fire-and-forget on the current tokio runtime; outside a runtime
/// the event falls back to stderr. Rejected deliveries are printed to stderr.
#[derive(Clone, Debug)]
pub struct HttpReporter {
    client: reqwest::Client,
    dsn: SentryDsn,
    release: String,
    environment: String,
}

impl HttpReporter {
    pub fn new(dsn: SentryDsn, release: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            dsn,
            release: release.into(),
            environment: "Development".to_string(),
        }
    }
}

impl ErrorReporter for HttpReporter {
    fn capture(&self, context: &str, error: &dyn std::fmt::Display) {
        let event = ErrorEvent {
            timestamp: iso_timestamp_utc(),
            level: "error",
            logger: "Sentry",
            platform: "other",
            message: error.to_string(),
            release: self.release.clone(),
            environment: self.environment.clone(),
            tags: EventTags {
                context: context.to_string(),
            },
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            eprintln!("[error-tracker] {}: {}", event.tags.context, event.message);
            return;
        };

        let request = self
            .client
            .post(self.dsn.store_url())
            .header("X-Sentry-Auth", self.dsn.auth_header())
            .json(&event);
        handle.spawn(async move {
            let delivered = request
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(e) = delivered {
                eprintln!("[error-tracker] failed to deliver event: {e}");
            }
        });
    }

    fn destination(&self) -> String {
        self.dsn.store_url().to_string()
    }
}

/// Pick the reporter matching the configured DSN. An unusable DSN falls back
/// to stderr.
pub fn from_config(cfg: &Config) -> Arc<dyn ErrorReporter> {
    let Some(raw) = &cfg.error_tracker_url else {
        return Arc::new(ConsoleReporter);
    };
    match SentryDsn::parse(raw) {
        Ok(dsn) => Arc::new(HttpReporter::new(dsn, cfg.bot_version.clone())),
        Err(e) => {
            eprintln!("{e}. Errors will be written to stderr.");
            Arc::new(ConsoleReporter)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::ErrorReporter;

    /// Collects captured errors for assertions.
    #[derive(Default)]
    pub struct RecordingReporter {
        pub events: Mutex<Vec<String>>,
    }

    impl RecordingReporter {
        pub fn count(&self) -> usize {
            self.events.lock().map(|e| e.len()).unwrap_or(0)
        }
    }

    impl ErrorReporter for RecordingReporter {
        fn capture(&self, context: &str, error: &dyn std::fmt::Display) {
            if let Ok(mut events) = self.events.lock() {
                events.push(format!("{context}: {error}"));
            }
        }
    }
}
