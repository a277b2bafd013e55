use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Days, Local, NaiveDate};

use crate::{logging::Severity, reporting::ErrorReporter};

/// Rotated files older than this many days are deleted.
pub const RETENTION_DAYS: u64 = 28;

/// Source of "now" for rotation and retention decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// File operations used by rotation.
pub trait LogFs: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn create(&self, path: &Path) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StdFs;

impl LogFs for StdFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create(&self, path: &Path) -> io::Result<()> {
        fs::File::create(path).map(drop)
    }
}

/// One log event. The sink stamps it with its clock when appending.
#[derive(Clone, Copy, Debug)]
pub struct LogRecord<'a> {
    pub severity: Severity,
    pub category: &'a str,
    pub message: &'a str,
    pub error: Option<&'a str>,
}

impl<'a> LogRecord<'a> {
    pub fn new(severity: Severity, category: &'a str, message: &'a str) -> Self {
        Self {
            severity,
            category,
            message,
            error: None,
        }
    }

    pub fn with_error(mut self, error: &'a str) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Default)]
struct SinkState {
    /// Creation date of the live file, once known.
    live_created: Option<NaiveDate>,
}

/// Append-only log writer with daily rotation and 28-day retention.
///
/// One sink per logger name; every category shares it. The rotate-check and the
/// append run under one mutex, so concurrent writers never interleave a line
/// with a rename.
pub struct RotatingLogSink {
    dir: PathBuf,
    name: String,
    min_severity: Severity,
    console: bool,
    clock: Arc<dyn Clock>,
    fs: Arc<dyn LogFs>,
    reporter: Arc<dyn ErrorReporter>,
    state: Mutex<SinkState>,
}

impl RotatingLogSink {
    pub fn new(
        dir: impl Into<PathBuf>,
        name: impl Into<String>,
        min_severity: Severity,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            min_severity,
            console: true,
            clock: Arc::new(SystemClock),
            fs: Arc::new(StdFs),
            reporter,
            state: Mutex::new(SinkState::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fs(mut self, fs: Arc<dyn LogFs>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn live_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }

    pub fn accepts(&self, severity: Severity) -> bool {
        self.min_severity.allows(severity)
    }

    /// Write `record` to the console and the live file.
    ///
    /// Records below the minimum severity are dropped. No failure is fatal:
    /// I/O errors go to the error reporter and the record still reaches the
    /// console.
    pub fn append(&self, record: &LogRecord<'_>) {
        if !self.accepts(record.severity) {
            return;
        }

        let now = self.clock.now();
        let line = format_line(now, record);

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let target = self.rotate_if_due(&mut state, now);

        if self.console {
            println!("{line}");
        }

        if let Some(path) = target {
            if let Err(e) = append_line(&path, &line) {
                self.reporter.capture("log append", &e);
            }
        }
    }

    /// Rotate the live file if its creation date is not today.
    ///
    /// Returns the file to append to, or `None` when only the console is left.
    fn rotate_if_due(&self, state: &mut SinkState, now: DateTime<Local>) -> Option<PathBuf> {
        let live = self.live_path();
        let today = now.date_naive();

        if state.live_created.is_none() {
            state.live_created = file_created_date(&live);
        }

        let created = match state.live_created {
            Some(date) if date != today => date,
            Some(_) => return Some(live),
            None => {
                // Appending creates the file.
                state.live_created = Some(today);
                return Some(live);
            }
        };

        if !live.exists() {
            state.live_created = Some(today);
            return Some(live);
        }

        let rotated = self.rotation_target(created);
        if let Err(e) = self.fs.rename(&live, &rotated) {
            self.reporter.capture("log rotation", &e);
            // Keep writing to the old file; retry on the next calendar day.
            state.live_created = Some(today);
            return Some(live);
        }

        if let Err(e) = self.fs.create(&live) {
            self.reporter.capture("log rotation", &e);
            state.live_created = None;
            return None;
        }
        state.live_created = Some(today);

        self.sweep_retention(today, &live);
        Some(live)
    }

    /// `<name>.log.<date>`, or `<name>.log.<date>.<n>` if that already exists.
    fn rotation_target(&self, created: NaiveDate) -> PathBuf {
        let base = format!("{}.log.{}", self.name, created.format("%Y-%m-%d"));
        let first = self.dir.join(&base);
        if !first.exists() {
            return first;
        }
        let mut index = 1usize;
        loop {
            let candidate = self.dir.join(format!("{base}.{index}"));
            if !candidate.exists() {
                return candidate;
            }
            index += 1;
        }
    }

    fn sweep_retention(&self, today: NaiveDate, live: &Path) {
        let Some(cutoff) = today.checked_sub_days(Days::new(RETENTION_DAYS)) else {
            return;
        };

        let entries = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) => {
                self.reporter.capture("log retention", &e);
                return;
            }
        };

        for ent in entries.flatten() {
            let path = ent.path();
            if path == live || !path.is_file() {
                continue;
            }
            let name = ent.file_name().to_string_lossy().to_string();
            let created = rotated_file_date(&name).or_else(|| file_created_date(&path));
            let Some(created) = created else {
                continue;
            };
            if created < cutoff {
                if let Err(e) = fs::remove_file(&path) {
                    self.reporter.capture("log retention", &e);
                }
            }
        }
    }
}

fn format_line(now: DateTime<Local>, record: &LogRecord<'_>) -> String {
    let message = match record.error {
        Some(err) if record.message.is_empty() => err.to_string(),
        Some(err) => format!("{}: {err}", record.message),
        None => record.message.to_string(),
    };
    format!(
        "[{}] [{:<11}] {}: {message}",
        now.format("%Y-%m-%d %H:%M:%S"),
        record.severity.label(),
        record.category,
    )
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

/// Creation date from metadata, falling back to the modification date on
/// filesystems without birth time.
fn file_created_date(path: &Path) -> Option<NaiveDate> {
    let md = fs::metadata(path).ok()?;
    let ts = md.created().or_else(|_| md.modified()).ok()?;
    Some(DateTime::<Local>::from(ts).date_naive())
}

/// Date suffix of a rotated file name (`bot.log.2024-03-01`, `bot.log.2024-03-01.2`).
fn rotated_file_date(file_name: &str) -> Option<NaiveDate> {
    let (_, rest) = file_name.split_once(".log.")?;
    let date = rest.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        io,
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use chrono::{DateTime, Duration, Local};

    use super::{Clock, LogFs, StdFs};

    /// Fails the first `renames` renames and `creates` creates, then behaves
    /// like [`StdFs`].
    #[derive(Default)]
    pub struct FlakyFs {
        pub renames: AtomicUsize,
        pub creates: AtomicUsize,
    }

    impl FlakyFs {
        pub fn failing(renames: usize, creates: usize) -> Self {
            Self {
                renames: AtomicUsize::new(renames),
                creates: AtomicUsize::new(creates),
            }
        }

        fn take(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl LogFs for FlakyFs {
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            if Self::take(&self.renames) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "rename refused"));
            }
            StdFs.rename(from, to)
        }

        fn create(&self, path: &Path) -> io::Result<()> {
            if Self::take(&self.creates) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "create refused"));
            }
            StdFs.create(path)
        }
    }

    /// Clock that only moves when told to.
    pub struct ManualClock {
        now: Mutex<DateTime<Local>>,
    }

    impl ManualClock {
        pub fn new(now: DateTime<Local>) -> Self {
            Self {
                now: Mutex::new(now),
            }
        }

        pub fn advance_days(&self, days: i64) {
            let mut now = self.now.lock().unwrap();
            *now += Duration::days(days);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            *self.now.lock().unwrap()
        }
    }
}
