//! End-to-end pipeline tests: subscription → poll → fan-out → persistence,
//! including restart behavior against a real (temporary) database file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use trackwatch::app::App;
use trackwatch::config::WatchConfig;
use trackwatch::cycle::try_run_cycle;
use trackwatch::error::{DeliveryError, SourceError};
use trackwatch::messaging::{Messenger, SendOutcome, TrackEmbed};
use trackwatch::model::{ArtistRef, ChannelId, ItemKind, Source, Track, TrackId};
use trackwatch::source::{Page, SourceClient};
use trackwatch::store::{LibSqlBackend, Store};

fn track(id: u64, published_offset_secs: i64) -> Track {
    let base = Utc::now().timestamp();
    Track {
        id: TrackId(id),
        kind: ItemKind::Upload,
        published_at: Utc
            .timestamp_opt(base - published_offset_secs, 0)
            .unwrap(),
        title: format!("track {id}"),
        description: Some("fresh upload".into()),
        permalink_url: format!("https://soundcloud.com/a/{id}"),
        artwork_url: None,
        artist: ArtistRef {
            id: 7,
            username: "some-artist".into(),
            permalink_url: "https://soundcloud.com/some-artist".into(),
            avatar_url: None,
        },
    }
}

/// Source client serving a scripted single page per source.
#[derive(Default)]
struct ScriptedSource {
    pages: Mutex<HashMap<Source, Vec<Track>>>,
}

impl ScriptedSource {
    fn set(&self, source: Source, items: Vec<Track>) {
        self.pages.lock().unwrap().insert(source, items);
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn fetch_page(
        &self,
        source: &Source,
        _cursor: Option<&str>,
    ) -> Result<Page, SourceError> {
        let items = self
            .pages
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .unwrap_or_default();
        Ok(Page {
            items,
            next_cursor: None,
        })
    }

    async fn resolve_artist(&self, name: &str) -> Result<ArtistRef, SourceError> {
        Err(SourceError::Resolve {
            name: name.into(),
            reason: "not scripted".into(),
        })
    }
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(ChannelId, String)>>,
}

impl RecordingMessenger {
    fn titles(&self, channel: ChannelId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(ch, _)| *ch == channel)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(
        &self,
        channel: ChannelId,
        embed: &TrackEmbed,
    ) -> Result<SendOutcome, DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel, embed.title.clone()));
        Ok(SendOutcome::Delivered)
    }

    async fn channel_exists(&self, _channel: ChannelId) -> Result<bool, DeliveryError> {
        Ok(true)
    }
}

async fn build_app(
    store: Arc<dyn Store>,
    source: Arc<ScriptedSource>,
    messenger: Arc<RecordingMessenger>,
) -> App {
    App::load(WatchConfig::default(), store, source, messenger)
        .await
        .expect("app should load")
}

#[tokio::test]
async fn follow_poll_dispatch_in_publication_order() {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let source = Arc::new(ScriptedSource::default());
    let messenger = Arc::new(RecordingMessenger::default());
    let app = build_app(store, Arc::clone(&source), Arc::clone(&messenger)).await;

    let tag = Source::Tag("house".into());
    let ch = ChannelId(100);
    app.index.follow(ch, tag.clone()).await.unwrap();

    // Newest first from the source; oldest first to the channel.
    source.set(tag.clone(), vec![track(5, 60), track(4, 120), track(3, 180)]);
    let stats = try_run_cycle(&app).await.unwrap().unwrap();
    assert_eq!(stats.sent, 3);
    assert_eq!(
        messenger.titles(ch),
        vec!["track 3", "track 4", "track 5"]
    );

    // Same page again: everything already seen, nothing re-sent.
    let stats = try_run_cycle(&app).await.unwrap().unwrap();
    assert_eq!(stats.new_items, 0);
    assert_eq!(messenger.titles(ch).len(), 3);
}

#[tokio::test]
async fn restart_does_not_cause_redelivery() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("trackwatch.db");
    let tag = Source::Tag("house".into());
    let ch = ChannelId(100);

    let source = Arc::new(ScriptedSource::default());
    source.set(tag.clone(), vec![track(5, 60), track(4, 120)]);

    {
        let store = Arc::new(LibSqlBackend::new_local(&db_path).await.unwrap());
        let messenger = Arc::new(RecordingMessenger::default());
        let app = build_app(store, Arc::clone(&source), Arc::clone(&messenger)).await;
        app.index.follow(ch, tag.clone()).await.unwrap();
        try_run_cycle(&app).await.unwrap().unwrap();
        assert_eq!(messenger.titles(ch).len(), 2);
    }

    // Process restart: fresh App over the same database.
    let store = Arc::new(LibSqlBackend::new_local(&db_path).await.unwrap());
    let messenger = Arc::new(RecordingMessenger::default());
    let app = build_app(store, Arc::clone(&source), Arc::clone(&messenger)).await;

    // Subscriptions survived.
    assert_eq!(app.index.sources_for(ch).await, vec![tag.clone()]);

    // The same page is still at the source's head; nothing is re-sent.
    let stats = try_run_cycle(&app).await.unwrap().unwrap();
    assert_eq!(stats.sent, 0);
    assert!(messenger.titles(ch).is_empty());
}

#[tokio::test]
async fn late_subscriber_receives_exactly_once() {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let source = Arc::new(ScriptedSource::default());
    let messenger = Arc::new(RecordingMessenger::default());
    let app = build_app(store, Arc::clone(&source), Arc::clone(&messenger)).await;

    let house = Source::Tag("house".into());
    let techno = Source::Tag("techno".into());
    app.index.follow(ChannelId(1), house.clone()).await.unwrap();

    // Track 5 shows up under both tags.
    source.set(house.clone(), vec![track(5, 60)]);
    source.set(techno.clone(), vec![track(5, 60)]);
    try_run_cycle(&app).await.unwrap().unwrap();
    assert_eq!(messenger.titles(ChannelId(1)), vec!["track 5"]);

    // Channel 2 follows the other tag afterwards; the track is new for that
    // source's subscribers but must not repeat for channel 1 ever.
    app.index.follow(ChannelId(2), techno.clone()).await.unwrap();
    app.index.follow(ChannelId(1), techno.clone()).await.unwrap();
    try_run_cycle(&app).await.unwrap().unwrap();

    assert_eq!(messenger.titles(ChannelId(2)), vec!["track 5"]);
    assert_eq!(messenger.titles(ChannelId(1)), vec!["track 5"]);
}
