use std::{
    cell::Cell,
    fmt::{self, Write as _},
    sync::Arc,
};

use tracing::{
    field::{Field, Visit},
    subscriber::Interest,
    Event, Level, Metadata, Subscriber,
};
use tracing_subscriber::layer::{Context, Layer};

use super::{LogHook, LogRecord, RotatingLogSink, Severity, DISCORD, PROGRAM, SENTRY};

thread_local! {
    // Set while this thread is inside `RotatingLogSink::append`.
    static IN_SINK: Cell<bool> = Cell::new(false);
}

/// `tracing` layer that turns events into [`LogRecord`]s for the sink.
pub struct SinkLayer {
    sink: Arc<RotatingLogSink>,
    hook: LogHook,
}

impl SinkLayer {
    pub fn new(sink: Arc<RotatingLogSink>, hook: LogHook) -> Self {
        Self { sink, hook }
    }

    fn category<'a>(&self, target: &'a str) -> Option<&'a str> {
        match target {
            PROGRAM | DISCORD | SENTRY => Some(target),
            t if t.starts_with("basis") => Some(PROGRAM),
            t if t.starts_with("serenity") => self.hook.is_attached().then_some(DISCORD),
            _ => None,
        }
    }

    fn level_enabled(&self, level: &Level) -> bool {
        let severity = severity_of(level);
        // An ERROR event may still be a CRITICAL record.
        self.sink.accepts(severity)
            || (severity == Severity::Error && self.sink.accepts(Severity::Critical))
    }
}

fn severity_of(level: &Level) -> Severity {
    match *level {
        Level::TRACE => Severity::Trace,
        Level::DEBUG => Severity::Debug,
        Level::INFO => Severity::Information,
        Level::WARN => Severity::Warning,
        Level::ERROR => Severity::Error,
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        // The hook can be detached at runtime, so never cache a decision.
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        if metadata.is_span() {
            return false;
        }
        self.category(metadata.target()).is_some() && self.level_enabled(metadata.level())
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let Some(category) = self.category(meta.target()) else {
            return;
        };

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let mut severity = severity_of(meta.level());
        if severity == Severity::Error && visitor.critical {
            severity = Severity::Critical;
        }

        let message = visitor.message();
        let mut record = LogRecord::new(severity, category, &message);
        if let Some(err) = visitor.error.as_deref() {
            record = record.with_error(err);
        }

        IN_SINK.with(|busy| {
            if busy.replace(true) {
                return;
            }
            self.sink.append(&record);
            busy.set(false);
        });
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    error: Option<String>,
    critical: bool,
    extra: String,
}

impl RecordVisitor {
    fn message(&self) -> String {
        if self.extra.is_empty() {
            return self.message.clone();
        }
        format!("{}{}", self.message, self.extra)
    }

    fn push_extra(&mut self, name: &str, value: &dyn fmt::Display) {
        let _ = write!(self.extra, " {name}={value}");
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "error" => self.error = Some(value.to_string()),
            name => self.push_extra(name, &value),
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        match field.name() {
            "critical" => self.critical = value,
            name => self.push_extra(name, &value),
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        match field.name() {
            "error" => self.error = Some(value.to_string()),
            name => self.push_extra(name, &value),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "error" => self.error = Some(format!("{value:?}")),
            name => self.push_extra(name, &format_args!("{value:?}")),
        }
    }
}
