//! Shared fixtures for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::app::App;
use crate::config::WatchConfig;
use crate::error::{DeliveryError, SourceError};
use crate::messaging::{Messenger, SendOutcome, TrackEmbed};
use crate::model::{ArtistRef, ChannelId, ItemKind, Source, Track, TrackId};
use crate::source::{Page, SourceClient};
use crate::store::LibSqlBackend;

pub(crate) fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub(crate) fn track(id: u64, published: i64) -> Track {
    Track {
        id: TrackId(id),
        kind: ItemKind::Upload,
        published_at: t(published),
        title: format!("track {id}"),
        description: None,
        permalink_url: format!("https://soundcloud.com/a/{id}"),
        artwork_url: None,
        artist: ArtistRef {
            id: 7,
            username: "a".into(),
            permalink_url: "https://soundcloud.com/a".into(),
            avatar_url: None,
        },
    }
}

/// Source client scripted per source; pages can be swapped between cycles.
#[derive(Default)]
pub(crate) struct MapSource {
    scripts: Mutex<HashMap<Source, Vec<Vec<Track>>>>,
    failing: Mutex<HashSet<Source>>,
}

impl MapSource {
    pub fn set_pages(&self, source: Source, pages: Vec<Vec<Track>>) {
        self.scripts.lock().unwrap().insert(source, pages);
    }

    pub fn fail(&self, source: Source) {
        self.failing.lock().unwrap().insert(source);
    }

    pub fn recover(&self, source: &Source) {
        self.failing.lock().unwrap().remove(source);
    }
}

#[async_trait]
impl SourceClient for MapSource {
    async fn fetch_page(
        &self,
        source: &Source,
        cursor: Option<&str>,
    ) -> Result<Page, SourceError> {
        if self.failing.lock().unwrap().contains(source) {
            return Err(SourceError::Transient {
                source_name: source.to_string(),
                reason: "scripted failure".into(),
            });
        }
        let scripts = self.scripts.lock().unwrap();
        let pages = scripts.get(source).cloned().unwrap_or_default();
        let idx: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let items = pages.get(idx).cloned().unwrap_or_default();
        let next_cursor = if idx + 1 < pages.len() {
            Some((idx + 1).to_string())
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    async fn resolve_artist(&self, name: &str) -> Result<ArtistRef, SourceError> {
        Err(SourceError::Resolve {
            name: name.into(),
            reason: "not scripted".into(),
        })
    }
}

/// Messenger that records deliveries and can be told to fail or report a
/// channel gone.
#[derive(Default)]
pub(crate) struct FakeMessenger {
    pub sent: Mutex<Vec<(ChannelId, String)>>,
    pub gone: Mutex<HashSet<ChannelId>>,
    pub fail_once: Mutex<HashSet<ChannelId>>,
}

impl FakeMessenger {
    pub fn sent_titles(&self, channel: ChannelId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(ch, _)| *ch == channel)
            .map(|(_, title)| title.clone())
            .collect()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send(
        &self,
        channel: ChannelId,
        embed: &TrackEmbed,
    ) -> Result<SendOutcome, DeliveryError> {
        if self.gone.lock().unwrap().contains(&channel) {
            return Ok(SendOutcome::ChannelGone);
        }
        if self.fail_once.lock().unwrap().remove(&channel) {
            return Err(DeliveryError {
                channel_id: channel.0,
                reason: "scripted failure".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel, embed.title.clone()));
        Ok(SendOutcome::Delivered)
    }

    async fn channel_exists(&self, channel: ChannelId) -> Result<bool, DeliveryError> {
        Ok(!self.gone.lock().unwrap().contains(&channel))
    }
}

pub(crate) async fn test_app(
    source: Arc<dyn SourceClient>,
    messenger: Arc<dyn Messenger>,
) -> App {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    App::load(WatchConfig::default(), store, source, messenger)
        .await
        .unwrap()
}
