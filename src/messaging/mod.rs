//! Messaging abstraction — delivery of rendered tracks to chat channels.

pub mod discord;
pub mod embed;

pub use discord::DiscordMessenger;
pub use embed::TrackEmbed;

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::model::ChannelId;

/// What happened to a send attempt that got a definitive answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The platform reports the channel no longer exists. This is the
    /// authoritative removal signal — the dispatcher prunes the
    /// subscription index on seeing it.
    ChannelGone,
}

/// Client for the chat platform's send side.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(
        &self,
        channel: ChannelId,
        embed: &TrackEmbed,
    ) -> Result<SendOutcome, DeliveryError>;

    /// Does the channel still exist? Used to validate follow requests up
    /// front; the send path never depends on it.
    async fn channel_exists(&self, channel: ChannelId) -> Result<bool, DeliveryError>;
}
