//! Fan-out dispatch — one track to every interested channel, at most once.
//!
//! The delivery-scope check runs per channel, not per source: a channel can
//! pick up a track it already received through an overlapping source (a tag
//! and the stream, say) and must be skipped, while a channel that followed
//! late still gets it. Dedup state is only written on confirmed success, so
//! a transient send failure leaves the pair eligible for retry the next
//! time the track is evaluated.

use chrono::Utc;
use tracing::{debug, warn};

use crate::app::App;
use crate::messaging::{SendOutcome, TrackEmbed};
use crate::model::{ChannelId, Track};

/// Counts for one dispatch pass, aggregated into the cycle stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pruned_channels: usize,
}

impl DispatchReport {
    pub fn absorb(&mut self, other: DispatchReport) {
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.pruned_channels += other.pruned_channels;
    }
}

/// Deliver one track to the candidate channels. Channel-level failures are
/// absorbed into the report — a bad channel never aborts the rest of the
/// fan-out, and a gone channel prunes the subscription index in place.
pub async fn dispatch_track(
    app: &App,
    track: &Track,
    candidates: &[ChannelId],
) -> DispatchReport {
    let mut report = DispatchReport::default();
    if candidates.is_empty() {
        return report;
    }
    let embed = TrackEmbed::render(track);

    for &channel in candidates {
        let already_delivered = {
            let delivered = app.delivered.lock().expect("delivery log mutex poisoned");
            delivered.contains(&(channel, track.id))
        };
        if already_delivered {
            debug!(%channel, track = %track.id, "Already delivered; skipping");
            report.skipped += 1;
            continue;
        }

        match app.messenger.send(channel, &embed).await {
            Ok(SendOutcome::Delivered) => {
                let now = Utc::now();
                app.delivered
                    .lock()
                    .expect("delivery log mutex poisoned")
                    .mark_at((channel, track.id), now);
                if let Err(e) = app.store.insert_delivery(channel, track.id, now).await {
                    // Worst case after a crash here is one duplicate send —
                    // preferable to dropping the record and the item.
                    warn!(%channel, track = %track.id, error = %e, "Delivered but failed to persist delivery record");
                }
                report.sent += 1;
            }
            Ok(SendOutcome::ChannelGone) => {
                if let Err(e) = app.index.remove_channel(channel).await {
                    warn!(%channel, error = %e, "Failed to prune gone channel");
                }
                report.pruned_channels += 1;
            }
            Err(e) => {
                warn!(%channel, track = %track.id, error = %e, "Delivery failed; will retry when re-evaluated");
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use crate::testutil::{FakeMessenger, MapSource, test_app, track};
    use std::sync::Arc;

    async fn setup() -> (Arc<FakeMessenger>, App) {
        let messenger = Arc::new(FakeMessenger::default());
        let app = test_app(
            Arc::new(MapSource::default()),
            Arc::clone(&messenger) as Arc<dyn crate::messaging::Messenger>,
        )
        .await;
        (messenger, app)
    }

    #[tokio::test]
    async fn delivers_once_per_channel() {
        let (messenger, app) = setup().await;
        let track = track(5, 100);
        let candidates = vec![ChannelId(1), ChannelId(2)];

        let report = dispatch_track(&app, &track, &candidates).await;
        assert_eq!(report.sent, 2);

        // A second evaluation (overlapping source, next cycle) skips both.
        let report = dispatch_track(&app, &track, &candidates).await;
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(messenger.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_send_is_retried_on_next_evaluation() {
        let (messenger, app) = setup().await;
        let track = track(5, 100);
        messenger.fail_once.lock().unwrap().insert(ChannelId(1));

        let report = dispatch_track(&app, &track, &[ChannelId(1)]).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 0);

        // Not marked delivered, so the retry goes through.
        let report = dispatch_track(&app, &track, &[ChannelId(1)]).await;
        assert_eq!(report.sent, 1);
        assert_eq!(messenger.sent_titles(ChannelId(1)), vec!["track 5"]);
    }

    #[tokio::test]
    async fn gone_channel_is_pruned_without_error() {
        let (messenger, app) = setup().await;
        app.index
            .follow(ChannelId(1), Source::Tag("house".into()))
            .await
            .unwrap();
        app.index
            .follow(ChannelId(2), Source::Tag("house".into()))
            .await
            .unwrap();
        messenger.gone.lock().unwrap().insert(ChannelId(1));

        let track = track(5, 100);
        let report = dispatch_track(&app, &track, &[ChannelId(1), ChannelId(2)]).await;
        assert_eq!(report.pruned_channels, 1);
        assert_eq!(report.sent, 1);

        // The dead channel is out of the index; the live one remains.
        assert_eq!(
            app.index.channels_for(&Source::Tag("house".into())).await,
            vec![ChannelId(2)]
        );
        // Not marked delivered for the gone channel.
        assert!(
            !app.delivered
                .lock()
                .unwrap()
                .contains(&(ChannelId(1), track.id))
        );
    }

    #[tokio::test]
    async fn delivery_rows_are_persisted() {
        let (_messenger, app) = setup().await;
        let track = track(5, 100);
        dispatch_track(&app, &track, &[ChannelId(1)]).await;

        let rows = app.store.load_deliveries().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id, ChannelId(1));
        assert_eq!(rows[0].track_id, track.id);
    }
}
