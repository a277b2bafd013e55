use std::{env, fs, path::PathBuf};

use crate::{
    domain::{OwnerIdentity, UserId},
    errors::Error,
    logging::Severity,
    Result,
};

/// Activity title written whenever the presence file has to be rebuilt.
pub const DEFAULT_ACTIVITY_TITLE: &str = "Made by Serpensin: https://gitlab.bloodygang.com/Serpensin";

/// Typed configuration, built once at startup and shared as `Arc<Config>`.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials / identity
    pub bot_token: String,
    pub owner: OwnerIdentity,
    pub bot_name: String,
    pub bot_version: String,

    // Error tracker
    pub error_tracker_url: Option<String>,

    // Logging
    pub min_severity: Severity,

    // Filesystem
    pub app_dir: PathBuf,
    pub log_dir: PathBuf,
    pub buffer_dir: PathBuf,
    pub presence_file: PathBuf,

    // Exports
    pub export_workers: usize,
}

impl Config {
    /// Build a config rooted at `app_dir` with defaults for everything else.
    pub fn new(bot_token: impl Into<String>, owner_id: u64, app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        Self {
            bot_token: bot_token.into(),
            owner: OwnerIdentity(UserId(owner_id)),
            bot_name: "BotName".to_string(),
            bot_version: env!("CARGO_PKG_VERSION").to_string(),
            error_tracker_url: None,
            min_severity: Severity::Warning,
            log_dir: app_dir.join("Logs"),
            buffer_dir: app_dir.join("Buffer"),
            presence_file: app_dir.join("activity.json"),
            app_dir,
            export_workers: 2,
        }
    }

    /// Build the config from the process environment, after merging `.env`
    /// from the working directory. Variables already set win over the file.
    pub fn load() -> Result<Self> {
        if let Ok(contents) = fs::read_to_string(".env") {
            for (key, value) in dotenv_pairs(&contents) {
                if env::var_os(&key).is_none() {
                    env::set_var(key, value);
                }
            }
        }

        let bot_token = var("TOKEN")
            .ok_or_else(|| Error::Config("TOKEN environment variable is required".to_string()))?;
        let owner_id = parse_owner_id(var("OWNER_ID"))?;
        let app_dir = var("APP_FOLDER").unwrap_or_else(|| "AppFolderName".to_string());

        let mut cfg = Self::new(bot_token, owner_id, app_dir);
        if let Some(name) = var("BOT_NAME") {
            cfg.bot_name = name;
        }
        if let Some(version) = var("BOT_VERSION") {
            cfg.bot_version = version;
        }
        cfg.error_tracker_url = var("SENTRY_DSN");
        if let Some(raw) = var("LOGGING_LEVEL") {
            cfg.min_severity = Severity::parse(&raw).unwrap_or_else(|| {
                println!(
                    "Invalid logging level '{raw}'. Falling back to '{}'.",
                    Severity::Warning.label()
                );
                Severity::Warning
            });
        }
        if let Some(workers) = var("EXPORT_WORKERS")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            cfg.export_workers = workers;
        }

        cfg.ensure_dirs()?;
        Ok(cfg)
    }

    /// Create the log and scratch directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.log_dir)?;
        fs::create_dir_all(&self.buffer_dir)?;
        Ok(())
    }

    /// Path of the live log file for this bot.
    pub fn live_log_file(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.bot_name))
    }
}

fn parse_owner_id(raw: Option<String>) -> Result<u64> {
    let raw = raw.ok_or_else(|| {
        Error::Config("OWNER_ID environment variable is not set or is empty".to_string())
    })?;
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(Error::Config(format!("Invalid ownerID: {raw}"))),
        Ok(id) => Ok(id),
    }
}

/// Trimmed value of `key`; blank counts as unset.
fn var(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `KEY=value` pairs from a `.env` file. Blank lines, `#` comments and lines
/// without `=` are skipped; an `export ` prefix and matching quotes are
/// stripped.
fn dotenv_pairs(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = ['"', '\'']
                .iter()
                .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
                .unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
