//! The update cycle — poll every subscribed source, fan out new items.
//!
//! One cycle at a time: the scheduler tick and the manual run-now endpoint
//! both go through `try_run_cycle`, and whoever loses the compare-exchange
//! is dropped, not queued. Source kinds run in a fixed order; a single
//! source failing is a warning, every source of a kind failing in one cycle
//! escalates to `AllSourcesFailed` because that smells like credentials or
//! connectivity, not per-source noise. The watermark is recomputed each
//! cycle, so a failed cycle self-heals on the next tick as long as new
//! items are still inside the lookback window.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::dispatch::{DispatchReport, dispatch_track};
use crate::error::CycleError;
use crate::model::Source;
use crate::poller::poll_source;

/// Fixed polling order for source kinds.
const KIND_ORDER: [&str; 3] = ["stream", "artist", "tag"];

/// Summary of one completed cycle, kept for the health endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CycleStats {
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub sources_polled: usize,
    pub source_failures: usize,
    pub new_items: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed_sends: usize,
    pub pruned_channels: usize,
}

impl CycleStats {
    fn absorb(&mut self, report: DispatchReport) {
        self.sent += report.sent;
        self.skipped += report.skipped;
        self.failed_sends += report.failed;
        self.pruned_channels += report.pruned_channels;
    }
}

/// Run a cycle unless one is already running (in which case the attempt is
/// dropped and `None` is returned).
pub async fn try_run_cycle(app: &App) -> Option<Result<CycleStats, CycleError>> {
    if app
        .cycle_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return None;
    }
    let result = run_cycle(app).await;
    app.cycle_running.store(false, Ordering::SeqCst);
    Some(result)
}

async fn run_cycle(app: &App) -> Result<CycleStats, CycleError> {
    let started = Utc::now();
    let watermark = started
        - chrono::Duration::from_std(app.config.lookback).unwrap_or(chrono::Duration::hours(1));

    let mut stats = CycleStats {
        started_at: Some(started),
        ..Default::default()
    };
    let mut failed_kinds: Vec<&'static str> = Vec::new();

    for kind in KIND_ORDER {
        if let Err(e) = run_kind(app, kind, watermark, &mut stats).await {
            error!(error = %e, "Cycle-level source failure");
            if let CycleError::AllSourcesFailed { kind } = e {
                failed_kinds.push(kind);
            }
        }
    }

    if failed_kinds.is_empty() {
        let cutoff = started
            - chrono::Duration::from_std(app.config.retention)
                .unwrap_or(chrono::Duration::hours(24));
        match app.store.prune_before(cutoff).await {
            Ok(pruned) if pruned > 0 => debug!(pruned, "Pruned expired dedup rows"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Dedup row pruning failed"),
        }
    }

    stats.duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
    *app.last_cycle.lock().expect("cycle stats mutex poisoned") = Some(stats);

    match failed_kinds.first() {
        Some(&kind) => Err(CycleError::AllSourcesFailed { kind }),
        None => Ok(stats),
    }
}

/// Poll every source of one kind and dispatch whatever is new.
async fn run_kind(
    app: &App,
    kind: &'static str,
    watermark: DateTime<Utc>,
    stats: &mut CycleStats,
) -> Result<(), CycleError> {
    let sources = app.index.sources_of_kind(kind).await;
    if sources.is_empty() {
        return Ok(());
    }

    let mut failures = 0usize;
    for source in &sources {
        let tracks = match poll_source(
            app.source.as_ref(),
            source,
            watermark,
            &app.seen,
            app.config.max_pages,
        )
        .await
        {
            Ok(tracks) => tracks,
            Err(e) => {
                failures += 1;
                stats.source_failures += 1;
                warn!(%source, transient = e.is_transient(), error = %e, "Source poll failed; skipping for this cycle");
                continue;
            }
        };

        stats.sources_polled += 1;
        if tracks.is_empty() {
            continue;
        }
        debug!(%source, new = tracks.len(), "New items surfaced");

        // The source returns newest first; deliver oldest first so channel
        // message order matches publication order.
        for track in tracks.iter().rev() {
            let candidates = match source {
                Source::Stream(stream_kind) if !track.matches_stream(*stream_kind) => Vec::new(),
                _ => app.index.channels_for(source).await,
            };
            let report = dispatch_track(app, track, &candidates).await;
            stats.absorb(report);
            stats.new_items += 1;

            // Mark after the dispatch pass so a crash mid-dispatch re-evaluates
            // the item instead of dropping it; channels that already got it
            // are shielded by the delivery log.
            let now = Utc::now();
            app.seen
                .lock()
                .expect("seen cache mutex poisoned")
                .mark_at((source.clone(), track.id), now);
            if let Err(e) = app.store.insert_seen(source, track.id, now).await {
                warn!(%source, track = %track.id, error = %e, "Failed to persist seen record");
            }
        }
    }

    if failures == sources.len() {
        return Err(CycleError::AllSourcesFailed { kind });
    }
    Ok(())
}

/// Spawn the periodic scheduler task.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop at the
/// next tick; a cycle in flight always runs to completion.
pub fn spawn_scheduler(app: Arc<App>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Update scheduler started — cycle every {:?}",
            app.config.poll_interval
        );
        let mut tick = tokio::time::interval(app.config.poll_interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Update scheduler shutting down");
                return;
            }

            match try_run_cycle(&app).await {
                None => debug!("Previous cycle still running; tick dropped"),
                Some(Ok(stats)) => info!(
                    new_items = stats.new_items,
                    sent = stats.sent,
                    skipped = stats.skipped,
                    failed_sends = stats.failed_sends,
                    duration_ms = stats.duration_ms,
                    "Cycle complete"
                ),
                Some(Err(e)) => error!(error = %e, "Cycle failed; retrying on next tick"),
            }
        }
    });

    (handle, shutdown_flag)
}
