//! The source poller — walks a paginated collection to find new items.
//!
//! Collections are assumed to come back newest first; the scan stops at the
//! first item that is either already in the source-scope cache or older than
//! the cycle watermark, so per-cycle work is bounded by "items since the
//! last processed one" rather than full history. If the platform ever
//! backfills or reorders already-returned items they will be silently
//! skipped — known limitation, inherited from the ordering assumption.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::dedup::{DecaySet, SeenKey};
use crate::error::SourceError;
use crate::model::{Source, Track};
use crate::source::SourceClient;

/// Fetch everything newer than the watermark that the source-scope cache
/// has not already surfaced. Returns items newest first (as fetched); the
/// result is finite and a fresh call re-fetches from the collection's
/// current head. Does NOT mark the cache — the cycle marks each item after
/// its dispatch pass completes.
pub async fn poll_source(
    client: &dyn SourceClient,
    source: &Source,
    watermark: DateTime<Utc>,
    seen: &Mutex<DecaySet<SeenKey>>,
    max_pages: usize,
) -> Result<Vec<Track>, SourceError> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    'pages: for page_no in 0..max_pages {
        let page = client.fetch_page(source, cursor.as_deref()).await?;
        debug!(%source, page_no, items = page.items.len(), "Page fetched");

        for track in page.items {
            let already_seen = {
                let seen = seen.lock().expect("seen cache mutex poisoned");
                seen.contains(&(source.clone(), track.id))
            };
            if already_seen {
                debug!(%source, track = %track.id, "Hit already-surfaced item; stopping scan");
                break 'pages;
            }
            if track.published_at < watermark {
                debug!(%source, track = %track.id, "Hit watermark; stopping scan");
                break 'pages;
            }
            items.push(track);
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtistRef, ItemKind, StreamKind, TrackId};
    use crate::source::Page;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn track(id: u64, published: i64) -> Track {
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

    /// Serves a fixed list of pages; cursor is the next page index.
    struct ScriptedSource {
        pages: Vec<Vec<Track>>,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Vec<Track>>) -> Self {
            Self {
                pages,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceClient for ScriptedSource {
        async fn fetch_page(
            &self,
            _source: &Source,
            cursor: Option<&str>,
        ) -> Result<Page, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let idx: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let items = self.pages.get(idx).cloned().unwrap_or_default();
            let next_cursor = if idx + 1 < self.pages.len() {
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

    fn empty_seen() -> Mutex<DecaySet<SeenKey>> {
        Mutex::new(DecaySet::new(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn yields_everything_above_watermark() {
        let client = ScriptedSource::new(vec![vec![track(5, 100), track(4, 90)]]);
        let source = Source::Tag("house".into());
        let items = poll_source(&client, &source, t(50), &empty_seen(), 10)
            .await
            .unwrap();
        assert_eq!(
            items.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![TrackId(5), TrackId(4)]
        );
    }

    #[tokio::test]
    async fn stops_at_watermark_without_fetching_more_pages() {
        let client = ScriptedSource::new(vec![
            vec![track(5, 100), track(4, 40)],
            vec![track(3, 30)],
        ]);
        let source = Source::Tag("house".into());
        let items = poll_source(&client, &source, t(50), &empty_seen(), 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, TrackId(5));
        // The scan must not touch page 2.
        assert_eq!(client.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_at_first_seen_item() {
        let source = Source::Tag("house".into());
        let seen = empty_seen();
        seen.lock()
            .unwrap()
            .mark_at((source.clone(), TrackId(5)), t(100));

        let client = ScriptedSource::new(vec![vec![track(6, 110), track(5, 100), track(4, 90)]]);
        let items = poll_source(&client, &source, t(50), &seen, 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, TrackId(6));
    }

    #[tokio::test]
    async fn walks_pages_until_collection_ends() {
        let client = ScriptedSource::new(vec![
            vec![track(6, 110), track(5, 100)],
            vec![track(4, 90)],
        ]);
        let source = Source::Artist(7);
        let items = poll_source(&client, &source, t(50), &empty_seen(), 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn page_cap_bounds_runaway_cursors() {
        let pages: Vec<Vec<Track>> = (0..20u64)
            .map(|p| vec![track(1000 - p, 1000 - p as i64)])
            .collect();
        let client = ScriptedSource::new(pages);
        let source = Source::Stream(StreamKind::All);
        let items = poll_source(&client, &source, t(0), &empty_seen(), 3)
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(client.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn seen_cache_is_scoped_per_source() {
        let seen = empty_seen();
        seen.lock()
            .unwrap()
            .mark_at((Source::Tag("techno".into()), TrackId(5)), t(100));

        // Same id marked under a different source must not stop this scan.
        let client = ScriptedSource::new(vec![vec![track(5, 100)]]);
        let source = Source::Tag("house".into());
        let items = poll_source(&client, &source, t(50), &seen, 10).await.unwrap();
        assert_eq!(items.len(), 1);
    }
}
