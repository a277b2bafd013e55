//! Persisted presence record (activity + status) with repair-on-read.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::DEFAULT_ACTIVITY_TITLE,
    errors::Error,
    logging::PROGRAM,
    reporting::ErrorReporter,
    utils::{capitalize, unique_token},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Playing,
    Streaming,
    Listening,
    Watching,
    Competing,
    #[serde(rename = "")]
    Empty,
}

impl ActivityType {
    /// Parse a command verb (`playing`, `Streaming`, ...).
    pub fn from_verb(verb: &str) -> Option<Self> {
        match capitalize(&verb.to_lowercase()).as_str() {
            "Playing" => Some(ActivityType::Playing),
            "Streaming" => Some(ActivityType::Streaming),
            "Listening" => Some(ActivityType::Listening),
            "Watching" => Some(ActivityType::Watching),
            "Competing" => Some(ActivityType::Competing),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::Playing => "Playing",
            ActivityType::Streaming => "Streaming",
            ActivityType::Listening => "Listening",
            ActivityType::Watching => "Watching",
            ActivityType::Competing => "Competing",
            ActivityType::Empty => "",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Idle,
    Dnd,
    Invisible,
}

impl Status {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "online" => Some(Status::Online),
            "idle" => Some(Status::Idle),
            "dnd" => Some(Status::Dnd),
            "invisible" => Some(Status::Invisible),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Idle => "idle",
            Status::Dnd => "dnd",
            Status::Invisible => "invisible",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The on-disk presence record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub activity_type: ActivityType,
    pub activity_title: String,
    pub activity_url: String,
    pub status: Status,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self {
            activity_type: ActivityType::Playing,
            activity_title: DEFAULT_ACTIVITY_TITLE.to_string(),
            activity_url: String::new(),
            status: Status::Online,
        }
    }
}

impl PresenceState {
    /// Schema rules beyond what serde enforces.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.activity_type {
            ActivityType::Streaming if self.activity_url.trim().is_empty() => {
                Err("Streaming activity requires a url".to_string())
            }
            ActivityType::Empty
                if !self.activity_title.is_empty() || !self.activity_url.is_empty() =>
            {
                Err("empty activity type must not carry a title or url".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn with_activity(&self, activity_type: ActivityType, title: &str, url: &str) -> Self {
        Self {
            activity_type,
            activity_title: title.to_string(),
            activity_url: url.to_string(),
            status: self.status,
        }
    }

    pub fn cleared(&self) -> Self {
        self.with_activity(ActivityType::Empty, "", "")
    }

    pub fn with_default_activity(&self) -> Self {
        let d = Self::default();
        self.with_activity(d.activity_type, &d.activity_title, &d.activity_url)
    }

    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Result of a save attempt. `Unchanged` means nothing was written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Applied(PresenceState),
    Unchanged,
}

/// File-backed presence record.
///
/// Every load→modify→save cycle runs under one mutex, so two concurrent
/// commands cannot lose each other's update. Calls do blocking file I/O;
/// async callers go through `spawn_blocking`.
pub struct PresenceStore {
    path: PathBuf,
    reporter: Arc<dyn ErrorReporter>,
    lock: Mutex<()>,
}

impl PresenceStore {
    pub fn new(path: impl Into<PathBuf>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            path: path.into(),
            reporter,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record; a missing or invalid file is replaced with the default.
    pub fn load(&self) -> PresenceState {
        let _guard = self.guard();
        self.load_locked()
    }

    pub fn save(&self, candidate: PresenceState) -> Result<SaveOutcome> {
        self.update(|_| candidate)
    }

    /// Apply `f` to the current record and persist the result if it differs.
    pub fn update(&self, f: impl FnOnce(&PresenceState) -> PresenceState) -> Result<SaveOutcome> {
        let _guard = self.guard();
        let current = self.load_locked();
        let next = f(&current);
        if next == current {
            return Ok(SaveOutcome::Unchanged);
        }
        next.validate()
            .map_err(|reason| Error::External(format!("refusing to save presence: {reason}")))?;
        write_atomic(&self.path, &next)?;
        Ok(SaveOutcome::Applied(next))
    }

    /// Restore the default activity, keeping the status. Always rewrites the
    /// file so the caller can unconditionally reapply it.
    pub fn reset_activity(&self) -> Result<PresenceState> {
        let _guard = self.guard();
        let next = self.load_locked().with_default_activity();
        write_atomic(&self.path, &next)?;
        Ok(next)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn load_locked(&self) -> PresenceState {
        match read_valid(&self.path) {
            Ok(state) => state,
            Err(reason) => {
                tracing::warn!(
                    target: PROGRAM,
                    "Presence file {} is invalid ({reason}); writing default.",
                    self.path.display()
                );
                let state = PresenceState::default();
                if let Err(e) = write_atomic(&self.path, &state) {
                    self.reporter.capture("presence repair", &e);
                }
                state
            }
        }
    }
}

fn read_valid(path: &Path) -> std::result::Result<PresenceState, String> {
    let raw = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let state: PresenceState = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    state.validate()?;
    Ok(state)
}

/// Whole-file replacement: write a sibling temp file, then rename over.
fn write_atomic(path: &Path, state: &PresenceState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;

    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidPath {
            path: path.to_path_buf(),
            reason: "presence file has no file name".to_string(),
        })?;
    let temp_path = parent.join(format!(".{file_name}.tmp-{}", unique_token()));

    fs::write(&temp_path, json)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reporting::testing::RecordingReporter, utils::testing::tmp_dir};

    fn store_in(dir: &Path) -> PresenceStore {
        PresenceStore::new(dir.join("activity.json"), Arc::new(RecordingReporter::default()))
    }

    fn on_disk(store: &PresenceStore) -> PresenceState {
        serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap()
    }

    #[test]
    fn missing_file_is_replaced_with_default() {
        let dir = tmp_dir("basis-presence-missing");
        let store = store_in(&dir);

        let state = store.load();
        assert_eq!(state, PresenceState::default());
        assert_eq!(on_disk(&store), PresenceState::default());
    }

    #[test]
    fn schema_violations_are_repaired() {
        let cases = [
            "not json at all",
            r#"{"activity_type":"Sleeping","activity_title":"x","activity_url":"","status":"online"}"#,
            r#"{"activity_type":"Playing","activity_title":"x","activity_url":"","status":"away"}"#,
            r#"{"activity_type":"Playing","activity_title":5,"activity_url":"","status":"online"}"#,
            r#"{"activity_type":"Playing","activity_title":"x","status":"online"}"#,
            r#"{"activity_type":"Streaming","activity_title":"x","activity_url":"","status":"online"}"#,
            r#"[]"#,
        ];

        for raw in cases {
            let dir = tmp_dir("basis-presence-invalid");
            let store = store_in(&dir);
            fs::write(store.path(), raw).unwrap();

            assert_eq!(store.load(), PresenceState::default(), "case: {raw}");
            assert_eq!(on_disk(&store), PresenceState::default(), "case: {raw}");
        }
    }

    #[test]
    fn valid_file_is_read_as_is_and_extra_keys_are_tolerated() {
        let dir = tmp_dir("basis-presence-valid");
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"{"activity_type":"Streaming","activity_title":"Live","activity_url":"https://twitch.tv/x","status":"dnd","extra":1}"#,
        )
        .unwrap();

        let state = store.load();
        assert_eq!(state.activity_type, ActivityType::Streaming);
        assert_eq!(state.activity_url, "https://twitch.tv/x");
        assert_eq!(state.status, Status::Dnd);
    }

    #[test]
    fn saving_an_equal_record_writes_nothing() {
        let dir = tmp_dir("basis-presence-unchanged");
        let store = store_in(&dir);

        // Compact JSON: any rewrite would come back pretty-printed.
        let compact = serde_json::to_string(&PresenceState::default()).unwrap();
        fs::write(store.path(), &compact).unwrap();

        let outcome = store.save(PresenceState::default()).unwrap();
        assert_eq!(outcome, SaveOutcome::Unchanged);
        assert_eq!(fs::read_to_string(store.path()).unwrap(), compact);
    }

    #[test]
    fn saving_a_different_record_persists_it() {
        let dir = tmp_dir("basis-presence-applied");
        let store = store_in(&dir);

        let next = store
            .load()
            .with_activity(ActivityType::Watching, "the logs", "");
        let outcome = store.save(next.clone()).unwrap();

        assert_eq!(outcome, SaveOutcome::Applied(next.clone()));
        assert_eq!(store.load(), next);
        // No temp files left behind.
        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["activity.json".to_string()]);
    }

    #[test]
    fn invalid_candidates_are_rejected_without_writing() {
        let dir = tmp_dir("basis-presence-reject");
        let store = store_in(&dir);
        let before = store.load();

        let bad = before.with_activity(ActivityType::Streaming, "Live", "");
        assert!(store.save(bad).is_err());
        assert_eq!(store.load(), before);
    }

    #[test]
    fn status_update_keeps_activity() {
        let dir = tmp_dir("basis-presence-status");
        let store = store_in(&dir);

        let outcome = store.update(|cur| cur.with_status(Status::Idle)).unwrap();
        let SaveOutcome::Applied(state) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(state.status, Status::Idle);
        assert_eq!(state.activity_title, DEFAULT_ACTIVITY_TITLE);
    }

    #[test]
    fn reset_rewrites_even_when_already_default() {
        let dir = tmp_dir("basis-presence-reset");
        let store = store_in(&dir);
        let compact = serde_json::to_string(&PresenceState::default().with_status(Status::Dnd)).unwrap();
        fs::write(store.path(), &compact).unwrap();

        let state = store.reset_activity().unwrap();
        assert_eq!(state, PresenceState::default().with_status(Status::Dnd));
        assert_ne!(fs::read_to_string(store.path()).unwrap(), compact);
    }

    #[test]
    fn clear_produces_an_empty_activity() {
        let cleared = PresenceState::default().cleared();
        assert_eq!(cleared.activity_type, ActivityType::Empty);
        assert!(cleared.validate().is_ok());
        let json = serde_json::to_value(&cleared).unwrap();
        assert_eq!(json["activity_type"], "");
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let dir = tmp_dir("basis-presence-race");
        let store = Arc::new(store_in(&dir));
        store.load();

        let a = {
            let store = store.clone();
            std::thread::spawn(move || {
                store
                    .update(|cur| cur.with_status(Status::Idle))
                    .unwrap()
            })
        };
        let b = {
            let store = store.clone();
            std::thread::spawn(move || {
                store
                    .update(|cur| cur.with_activity(ActivityType::Listening, "rain", ""))
                    .unwrap()
            })
        };
        a.join().unwrap();
        b.join().unwrap();

        let state = store.load();
        assert_eq!(state.status, Status::Idle);
        assert_eq!(state.activity_type, ActivityType::Listening);
    }
}
