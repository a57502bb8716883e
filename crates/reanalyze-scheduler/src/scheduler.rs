use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use reanalyze_core::{AnalysisRequest, AnalysisTrigger, Generation, SchedulerConfig, ScopeId};
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::status::{SchedulerMetrics, SchedulerMetricsSnapshot, ScopePhase, ScopeStatus};

/// Runs one launched request. The scheduler observes completion when the
/// returned future resolves; outcomes are the executor's business.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, request: AnalysisRequest, cancel: CancellationToken);
}

/// Tunable scheduling policy, replaceable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerPolicy {
    pub debounce: Duration,
    pub max_files_per_incremental_batch: usize,
}

impl From<&SchedulerConfig> for SchedulerPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            debounce: config.debounce(),
            max_files_per_incremental_batch: config.max_files_per_incremental_batch,
        }
    }
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

#[derive(Debug)]
struct PendingBatch {
    files: BTreeSet<PathBuf>,
    generation: Generation,
    /// Crossed the fan-out threshold; swallows the rest of the window.
    saturated: bool,
}

#[derive(Debug)]
struct RunningJob {
    generation: Generation,
    trigger: AnalysisTrigger,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct ScopeSlot {
    pending: Option<PendingBatch>,
    timer_armed: bool,
    running: Option<RunningJob>,
    /// Full analysis waiting for the running job to finish.
    forced: Option<BTreeSet<PathBuf>>,
    last_generation: Generation,
    closed: bool,
}

impl ScopeSlot {
    fn phase(&self) -> ScopePhase {
        if self.running.is_some() {
            ScopePhase::Running
        } else if self.pending.is_some() || self.forced.is_some() {
            ScopePhase::Pending
        } else {
            ScopePhase::Idle
        }
    }
}

type SlotRef = Arc<Mutex<ScopeSlot>>;

struct SchedulerInner {
    slots: DashMap<ScopeId, SlotRef>,
    policy: RwLock<SchedulerPolicy>,
    executor: Arc<dyn JobExecutor>,
    permits: Arc<Semaphore>,
    metrics: SchedulerMetrics,
}

/// Per-scope debounced job scheduler.
///
/// Each scope moves IDLE → PENDING → RUNNING → (IDLE | PENDING). Changes
/// coalesce into one pending batch per scope; the debounce timer is armed
/// once per batch and never restarted. At most one job per scope is in
/// flight, and a global semaphore bounds jobs across scopes. No method
/// blocks on analysis work.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(
        policy: SchedulerPolicy,
        max_concurrent_jobs: usize,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                slots: DashMap::new(),
                policy: RwLock::new(policy),
                executor,
                permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
                metrics: SchedulerMetrics::default(),
            }),
        }
    }

    pub fn from_config(config: &SchedulerConfig, executor: Arc<dyn JobExecutor>) -> Self {
        Self::new(SchedulerPolicy::from(config), config.max_concurrent_jobs, executor)
    }

    pub fn policy(&self) -> SchedulerPolicy {
        *self.inner.policy.read()
    }

    /// Takes effect for timers armed and batches evaluated from now on.
    pub fn set_policy(&self, policy: SchedulerPolicy) {
        info!(
            "Scheduler policy updated: debounce {:?}, max {} files per incremental batch",
            policy.debounce, policy.max_files_per_incremental_batch
        );
        *self.inner.policy.write() = policy;
    }

    /// Fold classified changes into the scope's pending batch.
    pub fn submit<I>(&self, scope: &ScopeId, files: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let files: Vec<PathBuf> = files.into_iter().collect();
        if files.is_empty() {
            return;
        }
        let max = self.policy().max_files_per_incremental_batch;
        let slot_ref = self.slot(scope);
        let mut slot = slot_ref.lock();

        let next_generation = slot.last_generation + 1;
        let batch = slot.pending.get_or_insert_with(|| {
            debug!("Scope {} pending with generation {}", scope, next_generation);
            PendingBatch {
                files: BTreeSet::new(),
                generation: next_generation,
                saturated: false,
            }
        });

        if batch.saturated {
            self.inner.metrics.record_ignored(files.len());
            debug!(
                "Ignoring {} changes for scope {}: pending batch already over the fan-out threshold",
                files.len(),
                scope
            );
        } else {
            self.inner.metrics.record_accepted(files.len());
            batch.files.extend(files);
            if batch.files.len() > max {
                info!(
                    "Discarding pending batch for scope {}: {} files exceed the incremental limit of {}",
                    scope,
                    batch.files.len(),
                    max
                );
                batch.files.clear();
                batch.saturated = true;
                self.inner.metrics.record_superseded();
            }
        }

        if slot.running.is_none() {
            self.arm_timer(scope, &slot_ref, &mut slot);
        }
    }

    /// Analyze `files` regardless of the fan-out threshold. A running
    /// incremental job is cancelled; the pending batch is absorbed. Launches
    /// once no job is in flight for the scope.
    pub fn request_full_analysis(&self, scope: &ScopeId, files: BTreeSet<PathBuf>) {
        let slot_ref = self.slot(scope);
        let mut slot = slot_ref.lock();

        let mut files = files;
        if let Some(batch) = slot.pending.take() {
            files.extend(batch.files);
        }
        if let Some(queued) = slot.forced.take() {
            files.extend(queued);
        }
        if files.is_empty() {
            debug!("Full analysis for scope {} has no files", scope);
            return;
        }

        if let Some(running) = slot.running.as_ref() {
            if running.trigger == AnalysisTrigger::Incremental {
                info!(
                    "Cancelling generation {} for scope {} in favor of a full analysis",
                    running.generation, scope
                );
                running.cancel.cancel();
            }
        }
        if slot.running.is_some() {
            slot.forced = Some(files);
        } else {
            self.launch(scope, &slot_ref, &mut slot, files, AnalysisTrigger::Full);
        }
    }

    /// Forget a scope: pending work is dropped and a running job cancelled.
    pub fn close_scope(&self, scope: &ScopeId) -> bool {
        let Some((_, slot_ref)) = self.inner.slots.remove(scope) else {
            return false;
        };
        let mut slot = slot_ref.lock();
        slot.closed = true;
        slot.pending = None;
        slot.forced = None;
        if let Some(running) = &slot.running {
            running.cancel.cancel();
        }
        info!("Closed scope {}", scope);
        true
    }

    pub fn phase(&self, scope: &ScopeId) -> ScopePhase {
        self.inner
            .slots
            .get(scope)
            .map(|slot| slot.lock().phase())
            .unwrap_or(ScopePhase::Idle)
    }

    pub fn status(&self, scope: &ScopeId) -> Option<ScopeStatus> {
        let slot_ref = self.inner.slots.get(scope)?.value().clone();
        let slot = slot_ref.lock();
        Some(ScopeStatus {
            scope: scope.clone(),
            phase: slot.phase(),
            pending_files: slot.pending.as_ref().map_or(0, |b| b.files.len()),
            saturated: slot.pending.as_ref().is_some_and(|b| b.saturated),
            full_analysis_queued: slot.forced.is_some(),
            last_generation: slot.last_generation,
            running_generation: slot.running.as_ref().map(|r| r.generation),
        })
    }

    pub fn scopes(&self) -> Vec<ScopeId> {
        let mut scopes: Vec<ScopeId> = self.inner.slots.iter().map(|e| e.key().clone()).collect();
        scopes.sort();
        scopes
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    fn slot(&self, scope: &ScopeId) -> SlotRef {
        self.inner
            .slots
            .entry(scope.clone())
            .or_default()
            .value()
            .clone()
    }

    fn arm_timer(&self, scope: &ScopeId, slot_ref: &SlotRef, slot: &mut ScopeSlot) {
        if slot.timer_armed {
            return;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot schedule analysis for scope {}: {}", scope, e);
                self.inner.metrics.record_launch_failure();
                slot.pending = None;
                return;
            }
        };
        slot.timer_armed = true;

        let delay = self.policy().debounce;
        let scheduler = self.clone();
        let scope = scope.clone();
        let slot_ref = slot_ref.clone();
        handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            scheduler.on_timer(&scope, &slot_ref);
        });
    }

    fn on_timer(&self, scope: &ScopeId, slot_ref: &SlotRef) {
        let mut slot = slot_ref.lock();
        slot.timer_armed = false;
        if slot.closed || slot.running.is_some() {
            return;
        }

        if let Some(files) = slot.forced.take() {
            self.launch(scope, slot_ref, &mut slot, files, AnalysisTrigger::Full);
            return;
        }

        let Some(batch) = slot.pending.take() else {
            return;
        };
        let max = self.policy().max_files_per_incremental_batch;
        if batch.saturated || batch.files.len() > max {
            info!(
                "Dropping generation {} batch for scope {}: exceeds {} files, incremental analysis skipped",
                batch.generation, scope, max
            );
            self.inner.metrics.record_fan_out_drop();
            return;
        }
        if batch.files.is_empty() {
            return;
        }
        self.launch(scope, slot_ref, &mut slot, batch.files, AnalysisTrigger::Incremental);
    }

    fn launch(
        &self,
        scope: &ScopeId,
        slot_ref: &SlotRef,
        slot: &mut ScopeSlot,
        files: BTreeSet<PathBuf>,
        trigger: AnalysisTrigger,
    ) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to launch analysis for scope {}: {}", scope, e);
                self.inner.metrics.record_launch_failure();
                return;
            }
        };

        let generation = slot.last_generation + 1;
        let cancel = CancellationToken::new();
        slot.last_generation = generation;
        slot.running = Some(RunningJob {
            generation,
            trigger,
            cancel: cancel.clone(),
        });
        self.inner.metrics.record_launch(trigger == AnalysisTrigger::Full);
        info!(
            "Launching {:?} analysis of {} files for scope {} (generation {})",
            trigger,
            files.len(),
            scope,
            generation
        );

        let request = AnalysisRequest {
            scope: scope.clone(),
            files,
            generation,
            trigger,
        };
        let scheduler = self.clone();
        let scope = scope.clone();
        let slot_ref = slot_ref.clone();
        handle.spawn(async move {
            let permits = scheduler.inner.permits.clone();
            let executor = scheduler.inner.executor.clone();
            let run = async move {
                let _permit = permits.acquire_owned().await.ok();
                executor.execute(request, cancel).await;
            };
            if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                error!("Analysis job for scope {} (generation {}) panicked", scope, generation);
            }
            scheduler.on_complete(&scope, &slot_ref, generation);
        });
    }

    fn on_complete(&self, scope: &ScopeId, slot_ref: &SlotRef, generation: Generation) {
        self.inner.metrics.record_completion();
        let mut slot = slot_ref.lock();
        if slot.running.as_ref().map(|r| r.generation) == Some(generation) {
            slot.running = None;
        }
        if slot.closed {
            return;
        }

        if let Some(files) = slot.forced.take() {
            self.launch(scope, slot_ref, &mut slot, files, AnalysisTrigger::Full);
        } else if slot.pending.is_some() {
            debug!("Scope {} has changes from generation {}'s run, re-arming", scope, generation);
            self.arm_timer(scope, slot_ref, &mut slot);
        } else {
            debug!("Scope {} idle after generation {}", scope, generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingExecutor {
        requests: Mutex<Vec<AnalysisRequest>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
        cancelled: AtomicUsize,
        run_time: Duration,
    }

    impl RecordingExecutor {
        fn new(run_time: Duration) -> Arc<Self> {
            Arc::new(Self {
                run_time,
                ..Default::default()
            })
        }

        fn requests(&self) -> Vec<AnalysisRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl JobExecutor for RecordingExecutor {
        async fn execute(&self, request: AnalysisRequest, cancel: CancellationToken) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().push(request);
            tokio::select! {
                _ = cancel.cancelled() => { self.cancelled.fetch_add(1, Ordering::SeqCst); }
                _ = tokio::time::sleep(self.run_time) => {}
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn policy(debounce_ms: u64, max: usize) -> SchedulerPolicy {
        SchedulerPolicy {
            debounce: Duration::from_millis(debounce_ms),
            max_files_per_incremental_batch: max,
        }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn set(names: &[&str]) -> BTreeSet<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_into_one_request() {
        let executor = RecordingExecutor::new(Duration::from_millis(10));
        let scheduler = JobScheduler::new(policy(500, 10), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.submit(&scope, paths(&["A.java"]));
        assert_eq!(scheduler.phase(&scope), ScopePhase::Pending);
        settle(100).await;
        scheduler.submit(&scope, paths(&["B.java", "A.java"]));
        settle(300).await;
        scheduler.submit(&scope, paths(&["C.java"]));
        assert!(executor.requests().is_empty());

        settle(1_000).await;
        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].files, set(&["A.java", "B.java", "C.java"]));
        assert_eq!(requests[0].generation, 1);
        assert_eq!(requests[0].trigger, AnalysisTrigger::Incremental);
        assert_eq!(scheduler.phase(&scope), ScopePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_not_restarted_by_later_changes() {
        let executor = RecordingExecutor::new(Duration::from_millis(10));
        let scheduler = JobScheduler::new(policy(500, 10), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.submit(&scope, paths(&["A.java"]));
        settle(450).await;
        scheduler.submit(&scope, paths(&["B.java"]));
        settle(100).await;
        assert_eq!(executor.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_threshold_boundary() {
        let executor = RecordingExecutor::new(Duration::from_millis(10));
        let scheduler = JobScheduler::new(policy(100, 3), 4, executor.clone());

        let at_limit = ScopeId::from("at-limit");
        scheduler.submit(&at_limit, paths(&["A", "B", "C"]));
        let over_limit = ScopeId::from("over-limit");
        scheduler.submit(&over_limit, paths(&["A", "B", "C", "D"]));
        settle(500).await;

        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].scope, at_limit);
        assert_eq!(scheduler.phase(&over_limit), ScopePhase::Idle);
        assert_eq!(scheduler.metrics().dropped_fan_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_window_swallows_later_changes() {
        let executor = RecordingExecutor::new(Duration::from_millis(10));
        let scheduler = JobScheduler::new(policy(100, 2), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.submit(&scope, paths(&["A", "B", "C"]));
        scheduler.submit(&scope, paths(&["D"]));
        let status = scheduler.status(&scope).unwrap();
        assert!(status.saturated);
        assert_eq!(status.pending_files, 0);
        settle(500).await;
        assert!(executor.requests().is_empty());

        // The next window starts clean.
        scheduler.submit(&scope, paths(&["E"]));
        settle(500).await;
        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].generation, 1);
        assert_eq!(scheduler.metrics().superseded, 1);
        assert_eq!(scheduler.metrics().changes_ignored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_during_run_queue_next_generation() {
        let executor = RecordingExecutor::new(Duration::from_secs(2));
        let scheduler = JobScheduler::new(policy(100, 10), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.submit(&scope, paths(&["A.java"]));
        settle(200).await;
        assert_eq!(scheduler.phase(&scope), ScopePhase::Running);

        scheduler.submit(&scope, paths(&["B.java"]));
        scheduler.submit(&scope, paths(&["C.java"]));
        settle(500).await;
        assert_eq!(executor.requests().len(), 1, "running job must not be superseded");
        assert_eq!(executor.cancelled.load(Ordering::SeqCst), 0);

        settle(5_000).await;
        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].files, set(&["B.java", "C.java"]));
        assert_eq!(requests[1].generation, 2);
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_job_per_scope_under_load() {
        let executor = RecordingExecutor::new(Duration::from_millis(250));
        let scheduler = JobScheduler::new(policy(50, 10), 4, executor.clone());
        let scope = ScopeId::from("p");

        for i in 0..40 {
            scheduler.submit(&scope, vec![PathBuf::from(format!("F{}.java", i % 7))]);
            settle(37).await;
        }
        settle(5_000).await;

        let requests = executor.requests();
        assert!(requests.len() > 1);
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
        let generations: Vec<_> = requests.iter().map(|r| r.generation).collect();
        let expected: Vec<_> = (1..=requests.len() as u64).collect();
        assert_eq!(generations, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scopes_run_concurrently_within_global_limit() {
        let executor = RecordingExecutor::new(Duration::from_secs(1));
        let scheduler = JobScheduler::new(policy(10, 10), 2, executor.clone());

        for name in ["a", "b", "c"] {
            scheduler.submit(&ScopeId::from(name), paths(&["X.java"]));
        }
        settle(5_000).await;
        assert_eq!(executor.requests().len(), 3);
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_analysis_cancels_incremental_and_absorbs_pending() {
        let executor = RecordingExecutor::new(Duration::from_secs(10));
        let scheduler = JobScheduler::new(policy(100, 2), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.submit(&scope, paths(&["A.java"]));
        settle(200).await;
        scheduler.submit(&scope, paths(&["B.java"]));
        scheduler.request_full_analysis(&scope, set(&["C.java", "D.java", "E.java"]));
        assert!(scheduler.status(&scope).unwrap().full_analysis_queued);
        settle(100).await;

        assert_eq!(executor.cancelled.load(Ordering::SeqCst), 1);
        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].trigger, AnalysisTrigger::Full);
        assert_eq!(requests[1].generation, 2);
        assert_eq!(requests[1].files.len(), 4, "full analysis ignores the fan-out threshold");
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_analysis_on_idle_scope_launches_immediately() {
        let executor = RecordingExecutor::new(Duration::from_millis(10));
        let scheduler = JobScheduler::new(policy(10_000, 10), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.request_full_analysis(&scope, set(&["A.java"]));
        assert_eq!(scheduler.phase(&scope), ScopePhase::Running);
        settle(50).await;
        assert_eq!(executor.requests().len(), 1);
        assert_eq!(scheduler.metrics().full_analyses_launched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_scope_cancels_and_forgets() {
        let executor = RecordingExecutor::new(Duration::from_secs(10));
        let scheduler = JobScheduler::new(policy(10, 10), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.submit(&scope, paths(&["A.java"]));
        settle(50).await;
        scheduler.submit(&scope, paths(&["B.java"]));
        assert!(scheduler.close_scope(&scope));
        settle(100).await;

        assert_eq!(executor.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(executor.requests().len(), 1);
        assert!(scheduler.status(&scope).is_none());
        assert!(!scheduler.close_scope(&scope));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_change_applies_to_next_window() {
        let executor = RecordingExecutor::new(Duration::from_millis(10));
        let scheduler = JobScheduler::new(policy(100, 10), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.set_policy(policy(0, 1));
        scheduler.submit(&scope, paths(&["A.java", "B.java"]));
        scheduler.submit(&ScopeId::from("q"), paths(&["A.java"]));
        settle(20).await;

        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].scope, ScopeId::from("q"));
    }

    #[test]
    fn test_submit_without_runtime_returns_to_idle() {
        let executor = RecordingExecutor::new(Duration::ZERO);
        let scheduler = JobScheduler::new(policy(10, 10), 4, executor.clone());
        let scope = ScopeId::from("p");

        scheduler.submit(&scope, paths(&["A.java"]));
        assert_eq!(scheduler.phase(&scope), ScopePhase::Idle);
        assert_eq!(scheduler.metrics().launch_failures, 1);
    }
}
