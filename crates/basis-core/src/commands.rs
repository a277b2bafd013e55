//! Owner command protocol over private messages.

use std::{num::NonZeroUsize, sync::Arc};

use reqwest::Url;

use crate::{
    domain::{ChannelId, ChannelKind, InboundMessage, OwnerIdentity},
    errors::Error,
    export::{LogExporter, LogTarget},
    logging::PROGRAM,
    ports::{ChatPort, PresencePort},
    presence::{ActivityType, PresenceState, PresenceStore, SaveOutcome, Status},
    reporting::ErrorReporter,
    shutdown::ShutdownSequencer,
    Result,
};

pub const HELP_TEXT: &str = "```\
Commands:\n\
help - Shows this message\n\
log - Get the log\n\
activity - Set the activity of the bot\n\
status - Set the status of the bot\n\
shutdown - Shutdown the bot\n\
```";

const STATUS_USAGE: &str =
    "```status [online/idle/dnd/invisible] - Set the status of the bot\n```";
const ACTIVITY_USAGE: &str = "```activity [playing/streaming/listening/watching/competing/clear/reset] [Title] [URL] - Set the activity of the bot\n```";
const LOG_USAGE: &str = "```log [current/folder/lines] (Replace lines with a positive number, if you only want lines.) - Get the log\n```";

/// A parsed owner command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Status(Status),
    Activity(ActivityCommand),
    Log(LogTarget),
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActivityCommand {
    Set {
        activity_type: ActivityType,
        title: String,
        url: String,
    },
    Clear,
    Reset,
}

/// Malformed arguments. Each variant maps to a fixed reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageError {
    UnknownVerb,
    Status,
    Activity,
    StreamingWithoutUrl,
    Log,
}

impl UsageError {
    pub fn reply(self) -> &'static str {
        match self {
            UsageError::UnknownVerb => HELP_TEXT,
            UsageError::Status => STATUS_USAGE,
            UsageError::Activity => ACTIVITY_USAGE,
            UsageError::StreamingWithoutUrl => "You must provide a URL for streaming.",
            UsageError::Log => LOG_USAGE,
        }
    }
}

pub fn parse_command(text: &str) -> std::result::Result<Command, UsageError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let Some((verb, args)) = tokens.split_first() else {
        return Err(UsageError::UnknownVerb);
    };

    match verb.to_lowercase().as_str() {
        "help" => Ok(Command::Help),
        "status" => parse_status(args).map(Command::Status),
        "activity" => parse_activity(args).map(Command::Activity),
        "log" => parse_log(args).map(Command::Log),
        "shutdown" => Ok(Command::Shutdown),
        _ => Err(UsageError::UnknownVerb),
    }
}

pub fn parse_status(args: &[&str]) -> std::result::Result<Status, UsageError> {
    args.first()
        .and_then(|raw| Status::parse(raw))
        .ok_or(UsageError::Status)
}

/// Parse `activity <verb> [title...] [url]`.
///
/// The last argument is taken as the url when it is an absolute http(s) URL;
/// the remaining arguments, joined by single spaces, form the title.
pub fn parse_activity(args: &[&str]) -> std::result::Result<ActivityCommand, UsageError> {
    let Some((verb, rest)) = args.split_first() else {
        return Err(UsageError::Activity);
    };

    let (url, title_tokens) = match rest.split_last() {
        Some((last, init)) if is_web_url(last) => (last.to_string(), init),
        _ => (String::new(), rest),
    };
    let mut title = title_tokens.join(" ");
    if !url.is_empty() {
        title = title.replace(url.as_str(), "").trim().to_string();
    }

    match verb.to_lowercase().as_str() {
        "clear" => Ok(ActivityCommand::Clear),
        "reset" => Ok(ActivityCommand::Reset),
        other => {
            let activity_type = ActivityType::from_verb(other).ok_or(UsageError::Activity)?;
            if activity_type == ActivityType::Streaming && url.is_empty() {
                return Err(UsageError::StreamingWithoutUrl);
            }
            Ok(ActivityCommand::Set {
                activity_type,
                title,
                url,
            })
        }
    }
}

pub fn parse_log(args: &[&str]) -> std::result::Result<LogTarget, UsageError> {
    let Some(raw) = args.first() else {
        return Err(UsageError::Log);
    };
    match raw.to_lowercase().as_str() {
        "current" => Ok(LogTarget::Current),
        "folder" => Ok(LogTarget::Folder),
        other => other
            .parse::<i64>()
            .ok()
            .and_then(|n| usize::try_from(n).ok())
            .and_then(NonZeroUsize::new)
            .map(LogTarget::Tail)
            .ok_or(UsageError::Log),
    }
}

fn is_web_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

/// Authorizes inbound messages and executes owner commands.
pub struct CommandDispatcher {
    owner: OwnerIdentity,
    store: Arc<PresenceStore>,
    exporter: Arc<LogExporter>,
    chat: Arc<dyn ChatPort>,
    presence: Arc<dyn PresencePort>,
    shutdown: Arc<ShutdownSequencer>,
    reporter: Arc<dyn ErrorReporter>,
}

impl CommandDispatcher {
    pub fn new(
        owner: OwnerIdentity,
        store: Arc<PresenceStore>,
        exporter: Arc<LogExporter>,
        chat: Arc<dyn ChatPort>,
        presence: Arc<dyn PresencePort>,
        shutdown: Arc<ShutdownSequencer>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            owner,
            store,
            exporter,
            chat,
            presence,
            shutdown,
            reporter,
        }
    }

    /// Handle one inbound message. Anything but an owner DM is only logged.
    pub async fn handle(&self, msg: &InboundMessage) {
        tracing::debug!(target: PROGRAM, "Message Received.");
        if msg.author_is_bot {
            return;
        }

        match msg.kind {
            ChannelKind::Private if self.owner.is(msg.author) => {
                tracing::debug!(
                    target: PROGRAM,
                    "Message received in DM from BotOwner ({}): {}",
                    msg.author_name,
                    msg.content
                );
            }
            ChannelKind::Private => {
                tracing::debug!(
                    target: PROGRAM,
                    "Message received in DM from {}: {}",
                    msg.author_name,
                    msg.content
                );
                return;
            }
            ChannelKind::Guild => {
                tracing::debug!(
                    target: PROGRAM,
                    "Message received in Guild from {}: {}",
                    msg.author_name,
                    msg.content
                );
                return;
            }
        }

        match parse_command(&msg.content) {
            Ok(command) => self.execute(msg.channel, command).await,
            Err(usage) => self.reply(msg.channel, usage.reply()).await,
        }
    }

    async fn execute(&self, channel: ChannelId, command: Command) {
        tracing::debug!(target: PROGRAM, "Command: {command:?}");
        match command {
            Command::Help => self.reply(channel, HELP_TEXT).await,
            Command::Status(status) => self.set_status(channel, status).await,
            Command::Activity(activity) => self.set_activity(channel, activity).await,
            Command::Log(target) => {
                let outcome = self.exporter.export(channel, target).await;
                if let Some(notice) = outcome.notice() {
                    self.reply(channel, notice).await;
                }
            }
            Command::Shutdown => {
                self.shutdown.run(Some(channel)).await;
            }
        }
    }

    async fn set_status(&self, channel: ChannelId, status: Status) {
        let current = self.presence.current_status().await;
        if current == status {
            let text = "Status doesn't need to be changed.";
            tracing::debug!(target: PROGRAM, "{text}");
            self.reply(channel, text).await;
            return;
        }

        tracing::debug!(target: PROGRAM, "Current Status: {current} | New Status: {status}");
        if let Err(e) = self
            .with_store(move |store| store.update(|cur| cur.with_status(status)))
            .await
        {
            self.fail("status save", &e);
            return;
        }
        if let Err(e) = self.presence.apply_status(status).await {
            self.fail("status apply", &e);
            return;
        }

        let text = format!("Setting status to {status}.");
        tracing::debug!(target: PROGRAM, "{text}");
        self.reply(channel, &text).await;
    }

    async fn set_activity(&self, channel: ChannelId, command: ActivityCommand) {
        let saved = match command.clone() {
            ActivityCommand::Reset => self
                .with_store(|store| store.reset_activity())
                .await
                .map(SaveOutcome::Applied),
            ActivityCommand::Clear => self.with_store(|store| store.update(PresenceState::cleared)).await,
            ActivityCommand::Set {
                activity_type,
                title,
                url,
            } => {
                self.with_store(move |store| {
                    store.update(|cur| cur.with_activity(activity_type, &title, &url))
                })
                .await
            }
        };

        let state = match saved {
            Ok(SaveOutcome::Applied(state)) => state,
            Ok(SaveOutcome::Unchanged) => {
                self.reply(channel, "Activity doesn't need to be changed.").await;
                return;
            }
            Err(e) => {
                self.fail("activity save", &e);
                return;
            }
        };

        if let Err(e) = self.presence.apply_activity(&state).await {
            self.fail("activity apply", &e);
            return;
        }

        let text = match command {
            ActivityCommand::Reset => "Activity reset to default.".to_string(),
            ActivityCommand::Clear => "Activity cleared.".to_string(),
            ActivityCommand::Set {
                activity_type,
                title,
                url,
            } => format!(
                "Setting activity to `{}` with title `{title}` and url `{url}`.",
                activity_type.as_str().to_lowercase()
            ),
        };
        tracing::debug!(target: PROGRAM, "{text}");
        self.reply(channel, &text).await;
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&PresenceStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| Error::External(format!("presence task failed: {e}")))?
    }

    async fn reply(&self, channel: ChannelId, text: &str) {
        if let Err(e) = self.chat.send_text(channel, text).await {
            tracing::warn!(target: PROGRAM, error = %e, "Failed to send reply");
        }
    }

    fn fail(&self, context: &str, e: &Error) {
        tracing::error!(target: PROGRAM, error = %e, "Command failed: {context}");
        self.reporter.capture(context, e);
    }
}
