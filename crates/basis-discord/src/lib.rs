//! Discord adapter (serenity).
//!
//! [`DiscordGateway`] implements the `basis-core` ports over the Discord HTTP
//! API and the shard runners; [`router`] turns gateway events into core events.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serenity::{
    builder::{CreateAttachment, CreateMessage},
    gateway::{ActivityData, ShardManager},
    http::Http,
    model::{
        id::{ChannelId as DiscordChannelId, UserId as DiscordUserId},
        user::OnlineStatus,
    },
};

pub mod router;

use basis_core::{
    domain::{ChannelId, UserId},
    errors::{DeliveryError, Error},
    logging::{LogHook, DISCORD},
    ports::{ChatPort, ConnectionPort, PresencePort},
    presence::{ActivityType, PresenceState, Status},
    Result,
};

/// Names and channels remembered from gateway traffic.
#[derive(Debug, Default)]
pub struct SeenCache {
    guilds: Mutex<HashMap<u64, String>>,
    users: Mutex<HashMap<u64, String>>,
    dm_channels: Mutex<HashSet<u64>>,
}

impl SeenCache {
    pub fn remember_guild(&self, id: u64, name: &str) {
        if let Ok(mut guilds) = self.guilds.lock() {
            guilds.insert(id, name.to_string());
        }
    }

    pub fn forget_guild(&self, id: u64) -> Option<String> {
        self.guilds.lock().ok().and_then(|mut g| g.remove(&id))
    }

    /// Cached guild name, or the id when the guild was never seen.
    pub fn guild_name(&self, id: u64) -> String {
        self.guilds
            .lock()
            .ok()
            .and_then(|g| g.get(&id).cloned())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn remember_user(&self, id: u64, name: &str) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(id, name.to_string());
        }
    }

    pub fn user_name(&self, id: u64) -> Option<String> {
        self.users.lock().ok().and_then(|u| u.get(&id).cloned())
    }

    pub fn remember_dm_channel(&self, id: u64) {
        if let Ok(mut channels) = self.dm_channels.lock() {
            channels.insert(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        let guilds = self.guilds.lock().map(|g| g.is_empty()).unwrap_or(true);
        let users = self.users.lock().map(|u| u.is_empty()).unwrap_or(true);
        let dms = self.dm_channels.lock().map(|d| d.is_empty()).unwrap_or(true);
        guilds && users && dms
    }

    pub fn clear(&self) {
        if let Ok(mut guilds) = self.guilds.lock() {
            guilds.clear();
        }
        if let Ok(mut users) = self.users.lock() {
            users.clear();
        }
        if let Ok(mut channels) = self.dm_channels.lock() {
            channels.clear();
        }
    }
}

/// Presence currently pushed to every shard.
#[derive(Clone, Debug)]
struct LivePresence {
    status: Status,
    activity: Option<ActivityData>,
}

pub struct DiscordGateway {
    http: Arc<Http>,
    shards: Arc<ShardManager>,
    hook: LogHook,
    seen: Arc<SeenCache>,
    live: tokio::sync::Mutex<LivePresence>,
}

impl DiscordGateway {
    pub fn new(
        http: Arc<Http>,
        shards: Arc<ShardManager>,
        hook: LogHook,
        seen: Arc<SeenCache>,
    ) -> Self {
        Self {
            http,
            shards,
            hook,
            seen,
            live: tokio::sync::Mutex::new(LivePresence {
                status: Status::Invisible,
                activity: None,
            }),
        }
    }

    async fn broadcast(&self, live: &LivePresence) {
        let runners = self.shards.runners.lock().await;
        for runner in runners.values() {
            runner
                .runner_tx
                .set_presence(live.activity.clone(), online_status(live.status));
        }
    }
}

pub fn online_status(status: Status) -> OnlineStatus {
    match status {
        Status::Online => OnlineStatus::Online,
        Status::Idle => OnlineStatus::Idle,
        Status::Dnd => OnlineStatus::DoNotDisturb,
        Status::Invisible => OnlineStatus::Invisible,
    }
}

/// The gateway activity for a stored record; `None` clears it.
pub fn activity_data(state: &PresenceState) -> Result<Option<ActivityData>> {
    let title = state.activity_title.clone();
    let activity = match state.activity_type {
        ActivityType::Playing => ActivityData::playing(title),
        ActivityType::Streaming => ActivityData::streaming(title, state.activity_url.as_str())
            .map_err(|e| Error::External(format!("invalid streaming url: {e}")))?,
        ActivityType::Listening => ActivityData::listening(title),
        ActivityType::Watching => ActivityData::watching(title),
        ActivityType::Competing => ActivityData::competing(title),
        ActivityType::Empty => return Ok(None),
    };
    Ok(Some(activity))
}

fn map_err(e: serenity::Error) -> Error {
    Error::External(format!("discord error: {e}"))
}

fn delivery_error(e: serenity::Error) -> DeliveryError {
    if let serenity::Error::Http(http) = &e {
        if http.status_code().map(|s| s.as_u16()) == Some(413) {
            return DeliveryError::PayloadTooLarge;
        }
    }
    DeliveryError::Failed(format!("discord error: {e}"))
}

#[async_trait]
impl ChatPort for DiscordGateway {
    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<()> {
        DiscordChannelId::new(channel.0)
            .say(&self.http, text)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn send_file(
        &self,
        channel: ChannelId,
        path: &Path,
        caption: Option<&str>,
    ) -> std::result::Result<(), DeliveryError> {
        let attachment = CreateAttachment::path(path)
            .await
            .map_err(|e| DeliveryError::Failed(format!("failed to read attachment: {e}")))?;
        let mut message = CreateMessage::new().add_file(attachment);
        if let Some(caption) = caption {
            message = message.content(caption);
        }

        DiscordChannelId::new(channel.0)
            .send_message(&self.http, message)
            .await
            .map_err(delivery_error)?;
        Ok(())
    }
}

#[async_trait]
impl PresencePort for DiscordGateway {
    async fn current_status(&self) -> Status {
        self.live.lock().await.status
    }

    async fn apply_status(&self, status: Status) -> Result<()> {
        let mut live = self.live.lock().await;
        live.status = status;
        self.broadcast(&live).await;
        tracing::debug!(target: DISCORD, "Status set to {status}.");
        Ok(())
    }

    async fn apply_activity(&self, state: &PresenceState) -> Result<()> {
        let activity = activity_data(state)?;
        let mut live = self.live.lock().await;
        live.activity = activity;
        self.broadcast(&live).await;
        Ok(())
    }
}

#[async_trait]
impl ConnectionPort for DiscordGateway {
    async fn resolve_user(&self, user: UserId) -> Option<String> {
        if user.0 == 0 {
            return None;
        }
        if let Some(name) = self.seen.user_name(user.0) {
            return Some(name);
        }
        match self.http.get_user(DiscordUserId::new(user.0)).await {
            Ok(found) => {
                self.seen.remember_user(user.0, &found.name);
                Some(found.name)
            }
            Err(e) => {
                tracing::warn!(target: DISCORD, error = %e, "Failed to fetch user {}", user.0);
                None
            }
        }
    }

    async fn purge_caches(&self) {
        self.seen.clear();
        tracing::debug!(target: DISCORD, "Caches purged.");
    }

    fn detach_log_hook(&self) {
        self.hook.detach();
    }

    async fn close(&self) {
        self.shards.shutdown_all().await;
    }
}
