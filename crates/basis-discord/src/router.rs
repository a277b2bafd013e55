use std::sync::Arc;

use async_trait::async_trait;
use serenity::{
    client::{Client, Context, EventHandler},
    model::{
        channel::Message,
        gateway::{GatewayIntents, Ready},
        guild::{Guild, Member, UnavailableGuild},
        id::GuildId,
        user::User,
    },
};
use tokio::sync::mpsc;

use basis_core::{
    domain::{ChannelId, ChannelKind, InboundMessage, UserId},
    events::InboundEvent,
    logging::{LogHook, DISCORD},
};

use crate::{DiscordGateway, SeenCache};

pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
}

/// Forwards gateway events into the core event queue.
pub struct Handler {
    tx: mpsc::Sender<InboundEvent>,
    seen: Arc<SeenCache>,
}

impl Handler {
    pub fn new(tx: mpsc::Sender<InboundEvent>, seen: Arc<SeenCache>) -> Self {
        Self { tx, seen }
    }

    async fn forward(&self, event: InboundEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!(target: DISCORD, "Event queue closed; dropping event.");
        }
    }
}

fn display_name(user: &User) -> String {
    user.global_name.clone().unwrap_or_else(|| user.name.clone())
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(target: DISCORD, "Connected as {}.", ready.user.name);
        self.forward(InboundEvent::Ready).await;
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let kind = match msg.guild_id {
            Some(_) => ChannelKind::Guild,
            None => {
                self.seen.remember_dm_channel(msg.channel_id.get());
                ChannelKind::Private
            }
        };
        self.forward(InboundEvent::Message(InboundMessage {
            author: UserId(msg.author.id.get()),
            author_name: msg.author.name.clone(),
            author_is_bot: msg.author.bot,
            channel: ChannelId(msg.channel_id.get()),
            kind,
            content: msg.content,
        }))
        .await;
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        self.seen.remember_guild(guild.id.get(), &guild.name);
        self.forward(InboundEvent::GuildAvailable { guild: guild.name })
            .await;
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, full: Option<Guild>) {
        // Outages also arrive as deletes; only a real removal counts.
        if incomplete.unavailable {
            return;
        }
        let id = incomplete.id.get();
        let cached = self.seen.forget_guild(id);
        let guild = full
            .map(|g| g.name)
            .or(cached)
            .unwrap_or_else(|| id.to_string());
        self.forward(InboundEvent::GuildLeft { guild }).await;
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        let guild = self.seen.guild_name(new_member.guild_id.get());
        self.forward(InboundEvent::MemberJoined {
            user: display_name(&new_member.user),
            guild,
        })
        .await;
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        user: User,
        _member_data_if_available: Option<Member>,
    ) {
        let guild = self.seen.guild_name(guild_id.get());
        self.forward(InboundEvent::MemberLeft {
            user: display_name(&user),
            guild,
        })
        .await;
    }
}

/// Build the client and the gateway that drives it. Events go to `tx`.
pub async fn connect(
    token: &str,
    hook: LogHook,
    tx: mpsc::Sender<InboundEvent>,
) -> anyhow::Result<(Client, Arc<DiscordGateway>)> {
    let seen = Arc::new(SeenCache::default());
    let client = Client::builder(token, intents())
        .event_handler(Handler::new(tx, seen.clone()))
        .await?;

    let gateway = Arc::new(DiscordGateway::new(
        client.http.clone(),
        client.shard_manager.clone(),
        hook,
        seen,
    ));
    Ok((client, gateway))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_cover_direct_messages_and_members() {
        let i = intents();
        assert!(i.contains(GatewayIntents::DIRECT_MESSAGES));
        assert!(i.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(i.contains(GatewayIntents::GUILD_MEMBERS));
    }
}
