//! The service object — all shared state, constructed once at startup.
//!
//! Everything the scheduler and the command handlers touch hangs off one
//! `Arc<App>`: the subscription index, both dedup scopes, the collaborator
//! clients, and the cycle guard. Lifecycle equals process lifetime.

use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::config::WatchConfig;
use crate::cycle::CycleStats;
use crate::dedup::{DecaySet, DeliveryKey, SeenKey};
use crate::error::StoreError;
use crate::messaging::Messenger;
use crate::source::SourceClient;
use crate::store::Store;
use crate::subscriptions::SubscriptionIndex;

pub struct App {
    pub config: WatchConfig,
    pub store: Arc<dyn Store>,
    pub index: SubscriptionIndex,
    /// Source-scope dedup: items already surfaced per source.
    pub seen: Mutex<DecaySet<SeenKey>>,
    /// Delivery-scope dedup: items already sent per channel.
    pub delivered: Mutex<DecaySet<DeliveryKey>>,
    pub source: Arc<dyn SourceClient>,
    pub messenger: Arc<dyn Messenger>,
    /// Idle/Running guard — a tick that lands while a cycle runs is dropped.
    pub cycle_running: AtomicBool,
    pub last_cycle: Mutex<Option<CycleStats>>,
}

impl App {
    /// Build the service: reload the subscription index and restore both
    /// dedup scopes from their snapshots so a restart does not replay the
    /// backlog. Rows with unreadable timestamps count as seen at load time.
    pub async fn load(
        config: WatchConfig,
        store: Arc<dyn Store>,
        source: Arc<dyn SourceClient>,
        messenger: Arc<dyn Messenger>,
    ) -> Result<Self, StoreError> {
        let index = SubscriptionIndex::load(Arc::clone(&store)).await?;

        let now = Utc::now();
        let mut seen = DecaySet::new(config.retention);
        for row in store.load_seen().await? {
            seen.mark_at((row.source, row.track_id), row.seen_at.unwrap_or(now));
        }
        let mut delivered = DecaySet::new(config.retention);
        for row in store.load_deliveries().await? {
            delivered.mark_at(
                (row.channel_id, row.track_id),
                row.delivered_at.unwrap_or(now),
            );
        }
        info!(
            seen = seen.len(),
            delivered = delivered.len(),
            "Dedup snapshots restored"
        );

        Ok(Self {
            config,
            store,
            index,
            seen: Mutex::new(seen),
            delivered: Mutex::new(delivered),
            source,
            messenger,
            cycle_running: AtomicBool::new(false),
            last_cycle: Mutex::new(None),
        })
    }
}
