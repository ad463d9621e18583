//! The `Store` trait — single async interface for all persistence.
//!
//! The subscription index and the dedup caches never talk to SQL directly;
//! they hold an `Arc<dyn Store>` and treat the backend as an implementation
//! detail. Every write is idempotent (insert-or-ignore / delete) so a retried
//! operation cannot corrupt state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{ChannelId, Source, TrackId};

/// A persisted subscription row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRow {
    pub channel_id: ChannelId,
    pub source: Source,
}

/// A persisted source-scope dedup row.
#[derive(Debug, Clone)]
pub struct SeenRow {
    pub source: Source,
    pub track_id: TrackId,
    /// `None` when the stored timestamp could not be parsed; the caller
    /// treats the entry as seen at load time.
    pub seen_at: Option<DateTime<Utc>>,
}

/// A persisted delivery-scope dedup row.
#[derive(Debug, Clone)]
pub struct DeliveryRow {
    pub channel_id: ChannelId,
    pub track_id: TrackId,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic persistence for subscriptions and dedup snapshots.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Subscriptions ───────────────────────────────────────────────

    /// Full-table scan for cold-start reload of the subscription index.
    async fn load_subscriptions(&self) -> Result<Vec<SubscriptionRow>, StoreError>;

    /// Idempotent insert of a `(channel, source)` pair.
    async fn insert_subscription(
        &self,
        channel: ChannelId,
        source: &Source,
    ) -> Result<(), StoreError>;

    /// Idempotent delete of a `(channel, source)` pair.
    async fn delete_subscription(
        &self,
        channel: ChannelId,
        source: &Source,
    ) -> Result<(), StoreError>;

    /// Delete every subscription owned by a channel.
    async fn delete_channel(&self, channel: ChannelId) -> Result<(), StoreError>;

    // ── Dedup snapshots ─────────────────────────────────────────────

    async fn load_seen(&self) -> Result<Vec<SeenRow>, StoreError>;

    async fn insert_seen(
        &self,
        source: &Source,
        track: TrackId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn load_deliveries(&self) -> Result<Vec<DeliveryRow>, StoreError>;

    async fn insert_delivery(
        &self,
        channel: ChannelId,
        track: TrackId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Drop dedup rows older than the cutoff. Returns rows removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
