//! Log exports: the live file, the whole log folder, or the last N lines.
//!
//! Every export stages its artifacts in a fresh `Buffer/<token>/` directory
//! that is removed afterwards, whatever the delivery result. File work runs on
//! the blocking pool, at most `export_workers` at a time.

use std::{
    collections::VecDeque,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Semaphore;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

use crate::{
    config::Config,
    domain::ChannelId,
    errors::{DeliveryError, Error},
    logging::PROGRAM,
    ports::ChatPort,
    reporting::ErrorReporter,
    utils::unique_token,
    Result,
};

const FOLDER_COPY_DIR: &str = "TEMP_LOG";

/// What the owner asked to export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogTarget {
    Current,
    Folder,
    Tail(NonZeroUsize),
}

/// Result of one export, as seen by the command channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportOutcome {
    Delivered,
    /// The plain file was too large; its archive went through instead.
    DeliveredAsArchive,
    TooLarge,
    FolderTooLarge,
    Unavailable,
    Failed,
}

impl ExportOutcome {
    /// Text to send after the export, if any.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            ExportOutcome::Delivered | ExportOutcome::DeliveredAsArchive => None,
            ExportOutcome::TooLarge => Some("Log file too large to send."),
            ExportOutcome::FolderTooLarge => Some(
                "The folder is too big to be sent directly.\nPlease get the current file or the last X lines.",
            ),
            ExportOutcome::Unavailable => Some("Log file is not available."),
            ExportOutcome::Failed => Some("Error sending log file."),
        }
    }
}

pub struct LogExporter {
    name: String,
    log_dir: PathBuf,
    live_file: PathBuf,
    buffer_dir: PathBuf,
    chat: Arc<dyn ChatPort>,
    reporter: Arc<dyn ErrorReporter>,
    workers: Arc<Semaphore>,
}

impl LogExporter {
    pub fn new(cfg: &Config, chat: Arc<dyn ChatPort>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            name: cfg.bot_name.clone(),
            log_dir: cfg.log_dir.clone(),
            live_file: cfg.live_log_file(),
            buffer_dir: cfg.buffer_dir.clone(),
            chat,
            reporter,
            workers: Arc::new(Semaphore::new(cfg.export_workers.max(1))),
        }
    }

    pub async fn export(&self, channel: ChannelId, target: LogTarget) -> ExportOutcome {
        match target {
            LogTarget::Current => self.export_current(channel).await,
            LogTarget::Folder => self.export_folder(channel).await,
            LogTarget::Tail(lines) => self.export_tail(channel, lines).await,
        }
    }

    async fn export_current(&self, channel: ChannelId) -> ExportOutcome {
        let live = self.live_file.clone();
        let buffer = self.buffer_dir.clone();
        let file_name = format!("{}.log", self.name);

        let staged = self
            .blocking(move || {
                let scratch = Scratch::create(&buffer)?;
                let file = scratch.path().join(file_name);
                fs::copy(&live, &file)?;
                Ok((scratch, file))
            })
            .await;

        let (scratch, file) = match staged {
            Ok(staged) => staged,
            Err(e) => return self.unavailable("current log", e),
        };

        let outcome = self
            .deliver_with_archive_fallback(channel, &scratch, &file, None)
            .await;
        self.discard(scratch).await;
        outcome
    }

    async fn export_tail(&self, channel: ChannelId, lines: NonZeroUsize) -> ExportOutcome {
        let live = self.live_file.clone();
        let buffer = self.buffer_dir.clone();
        let file_name = format!("{}-{lines}_lines.log", self.name);

        let staged = self
            .blocking(move || {
                let scratch = Scratch::create(&buffer)?;
                let file = scratch.path().join(file_name);
                write_tail(&live, &file, lines)?;
                Ok((scratch, file))
            })
            .await;

        let (scratch, file) = match staged {
            Ok(staged) => staged,
            Err(e) => return self.unavailable("log tail", e),
        };

        let caption = format!("Last {lines} lines of the log file.");
        let outcome = self
            .deliver_with_archive_fallback(channel, &scratch, &file, Some(&caption))
            .await;
        self.discard(scratch).await;
        outcome
    }

    async fn export_folder(&self, channel: ChannelId) -> ExportOutcome {
        let log_dir = self.log_dir.clone();
        let buffer = self.buffer_dir.clone();
        let archive_name = format!("{}.zip", self.name);

        let staged = self
            .blocking(move || {
                let scratch = Scratch::create(&buffer)?;
                let copies = copy_folder(&log_dir, &scratch.path().join(FOLDER_COPY_DIR))?;
                let archive = scratch.path().join(archive_name);
                zip_files(&copies, &archive)?;
                Ok((scratch, archive))
            })
            .await;

        let (scratch, archive) = match staged {
            Ok(staged) => staged,
            Err(e) => return self.unavailable("log folder", e),
        };

        let outcome = match self.chat.send_file(channel, &archive, None).await {
            Ok(()) => ExportOutcome::Delivered,
            Err(DeliveryError::PayloadTooLarge) => {
                tracing::debug!(target: PROGRAM, "Log folder archive too large to send.");
                ExportOutcome::FolderTooLarge
            }
            Err(DeliveryError::Failed(reason)) => {
                tracing::error!(target: PROGRAM, error = %reason, "Error sending log folder");
                ExportOutcome::Failed
            }
        };
        self.discard(scratch).await;
        outcome
    }

    /// Send `file`; on a size rejection archive it and try exactly once more.
    async fn deliver_with_archive_fallback(
        &self,
        channel: ChannelId,
        scratch: &Scratch,
        file: &Path,
        caption: Option<&str>,
    ) -> ExportOutcome {
        match self.chat.send_file(channel, file, caption).await {
            Ok(()) => return ExportOutcome::Delivered,
            Err(DeliveryError::Failed(reason)) => {
                tracing::error!(target: PROGRAM, error = %reason, "Error sending log file");
                return ExportOutcome::Failed;
            }
            Err(DeliveryError::PayloadTooLarge) => {
                tracing::debug!(target: PROGRAM, "Log file too large. Sending as archive.");
            }
        }

        let archive = scratch.path().join(format!("{}.zip", self.name));
        let (source, dest) = (file.to_path_buf(), archive.clone());
        if let Err(e) = self.blocking(move || zip_files(&[source], &dest)).await {
            self.reporter.capture("log archive", &e);
            tracing::error!(target: PROGRAM, error = %e, "Failed to archive log file");
            return ExportOutcome::Failed;
        }

        match self.chat.send_file(channel, &archive, caption).await {
            Ok(()) => ExportOutcome::DeliveredAsArchive,
            Err(e) => {
                tracing::warn!(target: PROGRAM, error = %e, "Archived log file could not be sent");
                ExportOutcome::TooLarge
            }
        }
    }

    fn unavailable(&self, what: &str, e: Error) -> ExportOutcome {
        tracing::error!(target: PROGRAM, error = %e, "Failed to stage {what}");
        self.reporter.capture(what, &e);
        ExportOutcome::Unavailable
    }

    async fn discard(&self, scratch: Scratch) {
        // Dropping removes the directory; do it on the blocking pool.
        if let Err(e) = self.blocking(move || {
            drop(scratch);
            Ok(())
        })
        .await
        {
            tracing::warn!(target: PROGRAM, error = %e, "Scratch cleanup did not run on the worker pool");
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::External(format!("export pool closed: {e}")))?;
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| Error::External(format!("export task failed: {e}")))?
    }
}

/// Per-export scratch directory, removed when dropped.
struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    fn create(buffer_dir: &Path) -> Result<Self> {
        let dir = buffer_dir.join(unique_token());
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    target: PROGRAM,
                    error = %e,
                    "Failed to remove scratch directory {}",
                    self.dir.display()
                );
            }
        }
    }
}

/// Copy the last `lines` lines of `source` into `dest`, in order.
fn write_tail(source: &Path, dest: &Path, lines: NonZeroUsize) -> Result<usize> {
    let keep = lines.get();
    let mut reader = BufReader::new(File::open(source)?);
    let mut window: VecDeque<Vec<u8>> = VecDeque::with_capacity(keep.min(1024));
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if window.len() == keep {
            window.pop_front();
        }
        window.push_back(line.clone());
    }

    let mut out = BufWriter::new(File::create(dest)?);
    for kept in &window {
        out.write_all(kept)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(window.len())
}

/// Copy every regular file in `log_dir` into `dest`; returns the copies.
fn copy_folder(log_dir: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut copies = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let target = dest.join(entry.file_name());
        fs::copy(entry.path(), &target)?;
        copies.push(target);
    }
    copies.sort();
    Ok(copies)
}

/// Write `files` into a new zip at `dest`, each under its bare file name.
fn zip_files(files: &[PathBuf], dest: &Path) -> Result<()> {
    let mut zip = ZipWriter::new(File::create(dest)?);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidPath {
                path: path.clone(),
                reason: "file name is not valid UTF-8".to_string(),
            })?;
        zip.start_file(name, options)?;
        io::copy(&mut File::open(path)?, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}
