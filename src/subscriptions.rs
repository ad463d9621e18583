//! The subscription index — which channels follow which sources.
//!
//! A bidirectional in-memory index (channel → sources, source → channels)
//! with write-through persistence. The durable write happens *before* the
//! in-memory mutation, so a failed write leaves both sides untouched and the
//! two copies can never diverge; the failed operation is simply reported to
//! the caller.
//!
//! Mutations take the internal mutex for the duration of one operation only.
//! Command handlers therefore never wait on a running update cycle — a
//! follow issued mid-cycle is visible to the current fan-out or the next
//! one, whichever lookup comes first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{ChannelId, Source};
use crate::store::Store;

#[derive(Default)]
struct Maps {
    by_channel: HashMap<ChannelId, HashSet<Source>>,
    by_source: HashMap<Source, HashSet<ChannelId>>,
}

pub struct SubscriptionIndex {
    store: Arc<dyn Store>,
    maps: Mutex<Maps>,
}

impl SubscriptionIndex {
    /// Cold-start reload from the durable store.
    pub async fn load(store: Arc<dyn Store>) -> Result<Self, StoreError> {
        let rows = store.load_subscriptions().await?;
        let mut maps = Maps::default();
        for row in rows {
            maps.by_channel
                .entry(row.channel_id)
                .or_default()
                .insert(row.source.clone());
            maps.by_source
                .entry(row.source)
                .or_default()
                .insert(row.channel_id);
        }
        info!(
            channels = maps.by_channel.len(),
            sources = maps.by_source.len(),
            "Subscription index loaded"
        );
        Ok(Self {
            store,
            maps: Mutex::new(maps),
        })
    }

    /// Subscribe a channel to a source. Idempotent.
    pub async fn follow(&self, channel: ChannelId, source: Source) -> Result<(), StoreError> {
        let mut maps = self.maps.lock().await;
        if maps
            .by_channel
            .get(&channel)
            .is_some_and(|s| s.contains(&source))
        {
            return Ok(());
        }
        self.store.insert_subscription(channel, &source).await?;
        maps.by_channel
            .entry(channel)
            .or_default()
            .insert(source.clone());
        maps.by_source.entry(source.clone()).or_default().insert(channel);
        debug!(%channel, %source, "Subscription added");
        Ok(())
    }

    /// Unsubscribe a channel from a source. Idempotent.
    pub async fn unfollow(&self, channel: ChannelId, source: Source) -> Result<(), StoreError> {
        let mut maps = self.maps.lock().await;
        if !maps
            .by_channel
            .get(&channel)
            .is_some_and(|s| s.contains(&source))
        {
            return Ok(());
        }
        self.store.delete_subscription(channel, &source).await?;
        if let Some(set) = maps.by_channel.get_mut(&channel) {
            set.remove(&source);
            if set.is_empty() {
                maps.by_channel.remove(&channel);
            }
        }
        if let Some(set) = maps.by_source.get_mut(&source) {
            set.remove(&channel);
            if set.is_empty() {
                maps.by_source.remove(&source);
            }
        }
        debug!(%channel, %source, "Subscription removed");
        Ok(())
    }

    /// Channels currently subscribed to a source. Fan-out lookup.
    pub async fn channels_for(&self, source: &Source) -> Vec<ChannelId> {
        let maps = self.maps.lock().await;
        maps.by_source
            .get(source)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Sources a channel is subscribed to. Listing lookup.
    pub async fn sources_for(&self, channel: ChannelId) -> Vec<Source> {
        let maps = self.maps.lock().await;
        maps.by_channel
            .get(&channel)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All sources of one kind that have at least one subscriber. The
    /// cycle polls exactly this set.
    pub async fn sources_of_kind(&self, kind: &str) -> Vec<Source> {
        let maps = self.maps.lock().await;
        let mut out: Vec<Source> = maps
            .by_source
            .iter()
            .filter(|(source, channels)| source.kind_str() == kind && !channels.is_empty())
            .map(|(source, _)| source.clone())
            .collect();
        out.sort();
        out
    }

    /// Cascade removal of a dead channel: durable rows first, then both map
    /// directions. Called when the platform reports the channel gone —
    /// either via an explicit event or a `ChannelGone` send outcome.
    pub async fn remove_channel(&self, channel: ChannelId) -> Result<(), StoreError> {
        let mut maps = self.maps.lock().await;
        self.store.delete_channel(channel).await?;
        maps.by_channel.remove(&channel);
        maps.by_source.retain(|_, channels| {
            channels.remove(&channel);
            !channels.is_empty()
        });
        info!(%channel, "Channel removed from subscription index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamKind;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use crate::model::TrackId;
    use crate::store::traits::{DeliveryRow, SeenRow, SubscriptionRow};

    async fn index() -> SubscriptionIndex {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        SubscriptionIndex::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn follow_is_idempotent_and_bidirectional() {
        let idx = index().await;
        let ch = ChannelId(1);
        let src = Source::Tag("house".into());

        idx.follow(ch, src.clone()).await.unwrap();
        idx.follow(ch, src.clone()).await.unwrap();

        assert_eq!(idx.channels_for(&src).await, vec![ch]);
        assert_eq!(idx.sources_for(ch).await, vec![src]);
    }

    #[tokio::test]
    async fn forward_and_reverse_stay_consistent() {
        let idx = index().await;
        let channels = [ChannelId(1), ChannelId(2), ChannelId(3)];
        let sources = [
            Source::Artist(7),
            Source::Tag("house".into()),
            Source::Stream(StreamKind::All),
        ];

        // Interleaved follows/unfollows, including no-op repeats.
        for &ch in &channels {
            for src in &sources {
                idx.follow(ch, src.clone()).await.unwrap();
            }
        }
        idx.unfollow(ChannelId(2), sources[0].clone()).await.unwrap();
        idx.unfollow(ChannelId(2), sources[0].clone()).await.unwrap();
        idx.unfollow(ChannelId(3), sources[2].clone()).await.unwrap();

        // channel appears in channels_for(source) iff source appears in
        // sources_for(channel)
        for &ch in &channels {
            for src in &sources {
                let forward = idx.sources_for(ch).await.contains(src);
                let reverse = idx.channels_for(src).await.contains(&ch);
                assert_eq!(forward, reverse, "{ch} vs {src}");
            }
        }
    }

    #[tokio::test]
    async fn survives_reload() {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        {
            let idx = SubscriptionIndex::load(Arc::clone(&store) as Arc<dyn Store>)
                .await
                .unwrap();
            idx.follow(ChannelId(1), Source::Artist(7)).await.unwrap();
            idx.follow(ChannelId(2), Source::Artist(7)).await.unwrap();
        }
        let idx = SubscriptionIndex::load(store).await.unwrap();
        let mut channels = idx.channels_for(&Source::Artist(7)).await;
        channels.sort();
        assert_eq!(channels, vec![ChannelId(1), ChannelId(2)]);
    }

    #[tokio::test]
    async fn remove_channel_cascades_both_directions() {
        let idx = index().await;
        idx.follow(ChannelId(1), Source::Artist(7)).await.unwrap();
        idx.follow(ChannelId(1), Source::Tag("house".into())).await.unwrap();
        idx.follow(ChannelId(2), Source::Artist(7)).await.unwrap();

        idx.remove_channel(ChannelId(1)).await.unwrap();

        assert!(idx.sources_for(ChannelId(1)).await.is_empty());
        assert_eq!(idx.channels_for(&Source::Artist(7)).await, vec![ChannelId(2)]);
        assert!(idx.channels_for(&Source::Tag("house".into())).await.is_empty());
    }

    #[tokio::test]
    async fn sources_of_kind_filters() {
        let idx = index().await;
        idx.follow(ChannelId(1), Source::Artist(7)).await.unwrap();
        idx.follow(ChannelId(1), Source::Tag("house".into())).await.unwrap();
        idx.follow(ChannelId(2), Source::Tag("techno".into())).await.unwrap();

        let tags = idx.sources_of_kind("tag").await;
        assert_eq!(
            tags,
            vec![Source::Tag("house".into()), Source::Tag("techno".into())]
        );
        assert_eq!(idx.sources_of_kind("stream").await, Vec::<Source>::new());
    }

    /// Store that fails every write, for the atomicity check.
    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn load_subscriptions(&self) -> Result<Vec<SubscriptionRow>, StoreError> {
            Ok(Vec::new())
        }
        async fn insert_subscription(
            &self,
            _channel: ChannelId,
            _source: &Source,
        ) -> Result<(), StoreError> {
            Err(StoreError::Query("disk full".into()))
        }
        async fn delete_subscription(
            &self,
            _channel: ChannelId,
            _source: &Source,
        ) -> Result<(), StoreError> {
            Err(StoreError::Query("disk full".into()))
        }
        async fn delete_channel(&self, _channel: ChannelId) -> Result<(), StoreError> {
            Err(StoreError::Query("disk full".into()))
        }
        async fn load_seen(&self) -> Result<Vec<SeenRow>, StoreError> {
            Ok(Vec::new())
        }
        async fn insert_seen(
            &self,
            _source: &Source,
            _track: TrackId,
            _at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn load_deliveries(&self) -> Result<Vec<DeliveryRow>, StoreError> {
            Ok(Vec::new())
        }
        async fn insert_delivery(
            &self,
            _channel: ChannelId,
            _track: TrackId,
            _at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn failed_persistence_leaves_memory_untouched() {
        let idx = SubscriptionIndex::load(Arc::new(FailingStore)).await.unwrap();
        let err = idx.follow(ChannelId(1), Source::Artist(7)).await;
        assert!(err.is_err());
        assert!(idx.sources_for(ChannelId(1)).await.is_empty());
        assert!(idx.channels_for(&Source::Artist(7)).await.is_empty());
    }
}
