use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{MAX_RUN_ERRORS, SAMPLE_PACE};
use crate::db::CatalogStore;
use crate::detector::AnomalyDetector;
use crate::error::Result;
use crate::retry::{fetch_with_retry, RetryPolicy};
use crate::scrape::CcuScraper;
use crate::state::CcuBoard;
use crate::types::{now_ms, GameRef, Progress, RunSummary, StopReason};

/// Round-robin sampler over a catalog snapshot.
///
/// One game at a time: scrape, classify against the game's window, append the
/// sample, record any anomaly, report progress, then sleep the fixed pace.
/// The cursor wraps forever; only the deadline or the cancellation token ends a
/// run, and both are checked before each item. A single item's failure never
/// ends the run.
///
/// Not reentrant: one run per sampler at a time (see [`super::RunController`]).
pub struct CircularSampler {
    catalog: Arc<dyn CatalogStore>,
    scraper: Arc<dyn CcuScraper>,
    detector: AnomalyDetector,
    scrape_retry: RetryPolicy,
    board: Arc<CcuBoard>,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
}

impl CircularSampler {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        scraper: Arc<dyn CcuScraper>,
        detector: AnomalyDetector,
        scrape_retry: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            scraper,
            detector,
            scrape_retry,
            board: CcuBoard::new(),
            latency: Arc::new(LatencyStats::new()),
            health: Arc::new(HealthState::new()),
        }
    }

    pub fn with_telemetry(
        mut self,
        board: Arc<CcuBoard>,
        latency: Arc<LatencyStats>,
        health: Arc<HealthState>,
    ) -> Self {
        self.board = board;
        self.latency = latency;
        self.health = health;
        self
    }

    /// Sample until `duration` has elapsed or `cancel` fires.
    pub async fn run<F>(&self, duration: Duration, on_progress: F, cancel: &CancellationToken) -> RunSummary
    where
        F: FnMut(&Progress),
    {
        // An unrepresentable deadline is as good as none.
        let deadline = Instant::now().checked_add(duration);
        self.run_loop(deadline, on_progress, cancel).await
    }

    /// Sample until `cancel` fires.
    pub async fn run_until_stopped<F>(&self, on_progress: F, cancel: &CancellationToken) -> RunSummary
    where
        F: FnMut(&Progress),
    {
        self.run_loop(None, on_progress, cancel).await
    }

    async fn run_loop<F>(&self, deadline: Option<Instant>, mut on_progress: F, cancel: &CancellationToken) -> RunSummary
    where
        F: FnMut(&Progress),
    {
        let games = match self.catalog.list_games().await {
            Ok(games) => games,
            Err(e) => {
                error!("Sampling run aborted: catalog unavailable: {e}");
                let mut tally = RunTally::new(0);
                tally.push_error(format!("catalog unavailable: {e}"));
                return tally.finish(StopReason::CatalogUnavailable);
            }
        };

        if games.is_empty() {
            warn!("Sampling run aborted: catalog is empty");
            let mut tally = RunTally::new(0);
            tally.push_error("catalog is empty; add games before sampling".to_string());
            return tally.finish(StopReason::EmptyCatalog);
        }

        let total = games.len();
        let mut tally = RunTally::new(total);
        let mut cursor = 0usize;
        info!(
            total_games = total,
            bounded = deadline.is_some(),
            "Sampling run started over {total} games"
        );

        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break StopReason::Deadline;
            }

            let game = &games[cursor];
            let started = Instant::now();
            self.sample_one(game, &mut tally).await;
            tally.busy += started.elapsed();
            tally.items += 1;

            on_progress(&Progress {
                index_in_cycle: cursor,
                total_games: total,
                current_game_title: game.title.clone(),
                successful_samples: tally.successful,
                failed_samples: tally.failed,
            });

            cursor = (cursor + 1) % total;
            if cursor == 0 {
                debug!(
                    successful = tally.successful,
                    failed = tally.failed,
                    "Sampling cycle complete, wrapping to first game"
                );
            }

            let pause = match deadline {
                Some(d) => SAMPLE_PACE.min(d.saturating_duration_since(Instant::now())),
                None => SAMPLE_PACE,
            };
            if !pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        };

        let summary = tally.finish(stop_reason);
        info!(
            stop_reason = %summary.stop_reason,
            items = summary.items_processed,
            successful = summary.successful_samples,
            failed = summary.failed_samples,
            avg_ms = summary.average_time_per_game_ms,
            "Sampling run finished ({}): {} ok, {} failed over {} items",
            summary.stop_reason,
            summary.successful_samples,
            summary.failed_samples,
            summary.items_processed,
        );
        summary
    }

    async fn sample_one(&self, game: &GameRef, tally: &mut RunTally) {
        let timestamp_ms = now_ms();
        let scrape_started = Instant::now();
        let reading = self.scrape(game).await;
        self.latency.record(scrape_started.elapsed());

        let ccu = match reading {
            Ok(Some(ccu)) => ccu,
            Ok(None) => {
                warn!(game_id = game.id, "No CCU reading for '{}'", game.title);
                let msg = format!("{}: CCU could not be determined", game.title);
                self.board.record_failure(game.id, msg.clone());
                tally.fail(msg);
                return;
            }
            Err(e) => {
                warn!(game_id = game.id, "Scrape failed for '{}': {e}", game.title);
                let msg = format!("{}: {e}", game.title);
                self.board.record_failure(game.id, msg.clone());
                tally.fail(msg);
                return;
            }
        };

        // Classify against history before this reading joins it.
        let verdict = match self.detector.classify_at(game.id, ccu, timestamp_ms).await {
            Ok(v) => v,
            Err(e) => {
                warn!(game_id = game.id, "Classification skipped for '{}': {e}", game.title);
                tally.push_error(format!("{}: classification failed: {e}", game.title));
                None
            }
        };

        if let Err(e) = self.catalog.append_sample(game.id, timestamp_ms, ccu).await {
            error!(game_id = game.id, "Sample write failed for '{}': {e}", game.title);
            let msg = format!("{}: sample write failed: {e}", game.title);
            self.board.record_failure(game.id, msg.clone());
            tally.fail(msg);
            return;
        }

        tally.successful += 1;
        self.board.record_success(game.id, ccu, timestamp_ms);
        self.health.record_sample(timestamp_ms);
        debug!(game_id = game.id, ccu, "Sampled '{}'", game.title);

        if let Some(anomaly) = verdict {
            if let Err(e) = self.detector.record(anomaly).await {
                error!(game_id = game.id, "Anomaly write failed for '{}': {e}", game.title);
                tally.push_error(format!("{}: anomaly write failed: {e}", game.title));
            }
        }
    }

    async fn scrape(&self, game: &GameRef) -> Result<Option<i64>> {
        if self.scraper.retries_internally() {
            return self.scraper.scrape_current_ccu(game).await;
        }
        let what = format!("scrape '{}'", game.title);
        fetch_with_retry(&self.scrape_retry, &what, || self.scraper.scrape_current_ccu(game)).await
    }
}

/// Counters owned by the running loop.
struct RunTally {
    total_games: usize,
    successful: u64,
    failed: u64,
    items: u64,
    busy: Duration,
    errors: VecDeque<String>,
}

impl RunTally {
    fn new(total_games: usize) -> Self {
        Self {
            total_games,
            successful: 0,
            failed: 0,
            items: 0,
            busy: Duration::ZERO,
            errors: VecDeque::new(),
        }
    }

    fn fail(&mut self, msg: String) {
        self.failed += 1;
        self.push_error(msg);
    }

    fn push_error(&mut self, msg: String) {
        if self.errors.len() == MAX_RUN_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(msg);
    }

    fn finish(self, stop_reason: StopReason) -> RunSummary {
        let average_time_per_game_ms = if self.items == 0 {
            0.0
        } else {
            self.busy.as_secs_f64() * 1000.0 / self.items as f64
        };
        RunSummary {
            total_games: self.total_games,
            successful_samples: self.successful,
            failed_samples: self.failed,
            items_processed: self.items,
            errors: self.errors.into(),
            average_time_per_game_ms,
            stop_reason,
        }
    }
}
