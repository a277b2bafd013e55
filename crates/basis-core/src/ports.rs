use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChannelId, UserId},
    errors::DeliveryError,
    presence::{PresenceState, Status},
    Result,
};

/// Port for replying in the command channel.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<()>;

    /// Upload `path` as a single attachment, with an optional message text.
    async fn send_file(
        &self,
        channel: ChannelId,
        path: &Path,
        caption: Option<&str>,
    ) -> std::result::Result<(), DeliveryError>;
}

/// Port for the presence broadcast on the live connection.
#[async_trait]
pub trait PresencePort: Send + Sync {
    /// Status currently shown on the connection.
    async fn current_status(&self) -> Status;

    async fn apply_status(&self, status: Status) -> Result<()>;

    async fn apply_activity(&self, state: &PresenceState) -> Result<()>;
}

/// Port for the transport connection lifecycle.
#[async_trait]
pub trait ConnectionPort: Send + Sync {
    /// Resolve a user's display name; `None` if the user does not exist.
    async fn resolve_user(&self, user: UserId) -> Option<String>;

    /// Drop channel, user and DM caches held for the connection.
    async fn purge_caches(&self);

    /// Stop forwarding transport log events into the log sink.
    fn detach_log_hook(&self);

    async fn close(&self);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        path::{Path, PathBuf},
        sync::Mutex,
    };

    use async_trait::async_trait;

    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Sent {
        Text(String),
        File {
            name: String,
            contents: Vec<u8>,
            caption: Option<String>,
        },
    }

    /// Chat fake recording every delivery. Uploads larger than `max_upload`
    /// bytes fail with `PayloadTooLarge`.
    pub struct FakeChat {
        pub sent: Mutex<Vec<Sent>>,
        pub attempted_paths: Mutex<Vec<PathBuf>>,
        pub max_upload: u64,
        pub fail_uploads: bool,
    }

    impl Default for FakeChat {
        fn default() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                attempted_paths: Mutex::new(Vec::new()),
                max_upload: u64::MAX,
                fail_uploads: false,
            }
        }
    }

    impl FakeChat {
        pub fn with_max_upload(max_upload: u64) -> Self {
            Self {
                max_upload,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Text(t) => Some(t),
                    Sent::File { .. } => None,
                })
                .collect()
        }

        pub fn files(&self) -> Vec<(String, Vec<u8>, Option<String>)> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::File {
                        name,
                        contents,
                        caption,
                    } => Some((name, contents, caption)),
                    Sent::Text(_) => None,
                })
                .collect()
        }

        pub fn attempted_paths(&self) -> Vec<PathBuf> {
            self.attempted_paths.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatPort for FakeChat {
        async fn send_text(&self, _channel: ChannelId, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
            Ok(())
        }

        async fn send_file(
            &self,
            _channel: ChannelId,
            path: &Path,
            caption: Option<&str>,
        ) -> std::result::Result<(), DeliveryError> {
            self.attempted_paths.lock().unwrap().push(path.to_path_buf());
            if self.fail_uploads {
                return Err(DeliveryError::Failed("connection reset".to_string()));
            }
            let contents = std::fs::read(path).map_err(|e| DeliveryError::Failed(e.to_string()))?;
            if contents.len() as u64 > self.max_upload {
                return Err(DeliveryError::PayloadTooLarge);
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.sent.lock().unwrap().push(Sent::File {
                name,
                contents,
                caption: caption.map(|c| c.to_string()),
            });
            Ok(())
        }
    }

    /// Presence + connection fake recording the calls made on it.
    pub struct FakeConnection {
        pub status: Mutex<Status>,
        pub activities: Mutex<Vec<PresenceState>>,
        pub calls: Mutex<Vec<String>>,
        pub known_user: Option<String>,
    }

    impl Default for FakeConnection {
        fn default() -> Self {
            Self {
                status: Mutex::new(Status::Invisible),
                activities: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                known_user: Some("owner".to_string()),
            }
        }
    }

    impl FakeConnection {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn activities(&self) -> Vec<PresenceState> {
            self.activities.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl PresencePort for FakeConnection {
        async fn current_status(&self) -> Status {
            *self.status.lock().unwrap()
        }

        async fn apply_status(&self, status: Status) -> Result<()> {
            *self.status.lock().unwrap() = status;
            self.record(format!("status:{status}"));
            Ok(())
        }

        async fn apply_activity(&self, state: &PresenceState) -> Result<()> {
            self.activities.lock().unwrap().push(state.clone());
            self.record(format!("activity:{}", state.activity_type.as_str()));
            Ok(())
        }
    }

    #[async_trait]
    impl ConnectionPort for FakeConnection {
        async fn resolve_user(&self, _user: UserId) -> Option<String> {
            self.known_user.clone()
        }

        async fn purge_caches(&self) {
            self.record("purge");
        }

        fn detach_log_hook(&self) {
            self.record("detach");
        }

        async fn close(&self) {
            self.record("close");
        }
    }
}
