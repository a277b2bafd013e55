/// Chat-platform user id (numeric snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub u64);

/// Chat-platform channel id (numeric snowflake).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Whether a message arrived in a direct (private) conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Private,
    Guild,
}

/// The single identity allowed to issue commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnerIdentity(pub UserId);

impl OwnerIdentity {
    pub fn is(&self, user: UserId) -> bool {
        self.0 == user
    }
}

/// One inbound chat message, as seen by the control plane.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub author: UserId,
    pub author_name: String,
    pub author_is_bot: bool,
    pub channel: ChannelId,
    pub kind: ChannelKind,
    pub content: String,
}
