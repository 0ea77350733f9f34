use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::sampler::CircularSampler;
use crate::types::{now_ms, Progress, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// Cancellation requested; the current item is finishing.
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub state: RunState,
    pub run_id: Option<u64>,
    pub started_at_ms: Option<i64>,
    pub duration_ms: Option<u64>,
    pub progress: Option<Progress>,
    pub last_summary: Option<RunSummary>,
}

struct Inner {
    state: RunState,
    next_run_id: u64,
    run_id: Option<u64>,
    started_at_ms: Option<i64>,
    duration: Option<Duration>,
    progress: Option<Progress>,
    last_summary: Option<RunSummary>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the single background sampling run.
///
/// At most one run is active; `start` while one is running is rejected with
/// [`AppError::RunActive`] rather than queued.
pub struct RunController {
    sampler: Arc<CircularSampler>,
    inner: Mutex<Inner>,
}

impl RunController {
    pub fn new(sampler: Arc<CircularSampler>) -> Arc<Self> {
        Arc::new(Self {
            sampler,
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                next_run_id: 1,
                run_id: None,
                started_at_ms: None,
                duration: None,
                progress: None,
                last_summary: None,
                cancel: None,
                handle: None,
            }),
        })
    }

    /// Spawn a run. `None` samples until stopped.
    pub fn start(self: &Arc<Self>, duration: Option<Duration>) -> Result<u64> {
        let mut inner = self.lock();
        if inner.state != RunState::Idle {
            return Err(AppError::RunActive);
        }

        let run_id = inner.next_run_id;
        inner.next_run_id += 1;
        let cancel = CancellationToken::new();
        inner.state = RunState::Running;
        inner.run_id = Some(run_id);
        inner.started_at_ms = Some(now_ms());
        inner.duration = duration;
        inner.progress = None;
        inner.cancel = Some(cancel.clone());

        // The lock is held until the handle is stored, so the task cannot
        // publish its summary before registration completes.
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let on_progress = |p: &Progress| this.lock().progress = Some(p.clone());
            let summary = match duration {
                Some(d) => this.sampler.run(d, on_progress, &cancel).await,
                None => this.sampler.run_until_stopped(on_progress, &cancel).await,
            };
            this.finish(run_id, summary);
        });
        inner.handle = Some(handle);

        info!(
            run_id,
            duration_secs = duration.map(|d| d.as_secs()),
            "Sampling run {run_id} started"
        );
        Ok(run_id)
    }

    /// Request cancellation. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != RunState::Running {
            return false;
        }
        if let Some(cancel) = &inner.cancel {
            cancel.cancel();
        }
        inner.state = RunState::Stopping;
        info!(run_id = inner.run_id, "Sampling run stop requested");
        true
    }

    pub fn status(&self) -> RunStatus {
        let inner = self.lock();
        let active = inner.state != RunState::Idle;
        RunStatus {
            state: inner.state,
            run_id: inner.run_id,
            started_at_ms: inner.started_at_ms.filter(|_| active),
            duration_ms: inner.duration.filter(|_| active).map(|d| d.as_millis() as u64),
            progress: inner.progress.clone(),
            last_summary: inner.last_summary.clone(),
        }
    }

    /// Wait for the current run, if any, to finish on its own.
    pub async fn join(&self) {
        let handle = self.lock().handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Sampling task ended abnormally: {e}");
                let mut inner = self.lock();
                inner.state = RunState::Idle;
                inner.cancel = None;
            }
        }
    }

    /// Stop the current run and wait for it to wind down.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }

    fn finish(&self, run_id: u64, summary: RunSummary) {
        let mut inner = self.lock();
        if inner.run_id != Some(run_id) {
            return;
        }
        inner.state = RunState::Idle;
        inner.cancel = None;
        inner.last_summary = Some(summary);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::sampler::scheduler::tests::{sampler, ScriptedScraper};
    use crate::types::StopReason;

    fn controller(titles: &[&str]) -> Arc<RunController> {
        let store = Arc::new(MemoryStore::with_games(titles));
        RunController::new(Arc::new(sampler(&store, Arc::new(ScriptedScraper::constant(10)))))
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_while_running() {
        let c = controller(&["A", "B"]);
        let first = c.start(None).unwrap();
        assert_eq!(first, 1);
        assert!(matches!(c.start(None), Err(AppError::RunActive)));
        assert_eq!(c.status().state, RunState::Running);

        c.shutdown().await;
        let status = c.status();
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.last_summary.map(|s| s.stop_reason), Some(StopReason::Cancelled));

        assert_eq!(c.start(None).unwrap(), 2);
        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_run_finishes_on_its_own() {
        let c = controller(&["A", "B", "C"]);
        c.start(Some(Duration::from_secs(5))).unwrap();
        c.join().await;

        let status = c.status();
        assert_eq!(status.state, RunState::Idle);
        assert!(status.started_at_ms.is_none());
        let summary = status.last_summary.expect("summary");
        assert_eq!(summary.stop_reason, StopReason::Deadline);
        assert_eq!(summary.items_processed, 3);
        assert_eq!(status.progress.map(|p| p.index_in_cycle), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_run_is_noop() {
        let c = controller(&["A"]);
        assert!(!c.stop());
        assert_eq!(c.status().state, RunState::Idle);
        c.shutdown().await;
        assert!(c.status().last_summary.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_visible_mid_run() {
        let c = controller(&["A", "B", "C"]);
        c.start(None).unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        let progress = c.status().progress.expect("progress");
        assert_eq!(progress.successful_samples, 2);
        assert_eq!(progress.current_game_title, "B");

        assert!(c.stop());
        assert_eq!(c.status().state, RunState::Stopping);
        c.join().await;
        assert_eq!(c.status().last_summary.map(|s| s.items_processed), Some(2));
    }
}
