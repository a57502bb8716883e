// ABOUTME: Status and metrics structures for the analysis scheduler
// ABOUTME: Tracks per-scope phase, scheduling counters and reconciliation activity

use chrono::{DateTime, Utc};
use reanalyze_core::{Generation, ScopeId};
use reanalyze_reconcile::CommitOutcome;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduling phase of one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopePhase {
    Idle,
    Pending,
    Running,
}

impl std::fmt::Display for ScopePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopePhase::Idle => write!(f, "Idle"),
            ScopePhase::Pending => write!(f, "Pending"),
            ScopePhase::Running => write!(f, "Running"),
        }
    }
}

/// Point-in-time view of one scope's scheduling state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeStatus {
    pub scope: ScopeId,
    pub phase: ScopePhase,
    /// Files waiting in the pending batch
    pub pending_files: usize,
    /// Pending batch exceeded the fan-out threshold and will be dropped
    pub saturated: bool,
    /// Full analysis waiting for the running job to finish
    pub full_analysis_queued: bool,
    /// Generation of the most recently launched job
    pub last_generation: Generation,
    pub running_generation: Option<Generation>,
}

/// Lock-free scheduling counters
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    changes_accepted: AtomicU64,
    changes_ignored: AtomicU64,
    batches_launched: AtomicU64,
    full_analyses_launched: AtomicU64,
    dropped_fan_out: AtomicU64,
    superseded: AtomicU64,
    launch_failures: AtomicU64,
    jobs_completed: AtomicU64,
}

impl SchedulerMetrics {
    pub fn record_accepted(&self, files: usize) {
        self.changes_accepted.fetch_add(files as u64, Ordering::Relaxed);
    }

    pub fn record_ignored(&self, files: usize) {
        self.changes_ignored.fetch_add(files as u64, Ordering::Relaxed);
    }

    pub fn record_launch(&self, full: bool) {
        if full {
            self.full_analyses_launched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.batches_launched.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_fan_out_drop(&self) {
        self.dropped_fan_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_launch_failure(&self) {
        self.launch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            changes_accepted: self.changes_accepted.load(Ordering::Relaxed),
            changes_ignored: self.changes_ignored.load(Ordering::Relaxed),
            batches_launched: self.batches_launched.load(Ordering::Relaxed),
            full_analyses_launched: self.full_analyses_launched.load(Ordering::Relaxed),
            dropped_fan_out: self.dropped_fan_out.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            launch_failures: self.launch_failures.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMetricsSnapshot {
    pub changes_accepted: u64,
    pub changes_ignored: u64,
    pub batches_launched: u64,
    pub full_analyses_launched: u64,
    pub dropped_fan_out: u64,
    pub superseded: u64,
    pub launch_failures: u64,
    pub jobs_completed: u64,
}

/// Outcome counters for analysis runs and marker reconciliation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMetrics {
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub files_reconciled: u64,
    pub markers_created: u64,
    pub markers_updated: u64,
    pub markers_deleted: u64,
    pub issues_rejected: u64,
    pub stale_results: u64,
    pub store_failures: u64,
    pub last_analyzed: Option<DateTime<Utc>>,
}

impl AnalysisMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_commit(&mut self, outcome: &CommitOutcome) {
        match outcome {
            CommitOutcome::Applied {
                created,
                updated,
                deleted,
                rejected,
                ..
            } => {
                self.files_reconciled += 1;
                self.markers_created += *created as u64;
                self.markers_updated += *updated as u64;
                self.markers_deleted += *deleted as u64;
                self.issues_rejected += *rejected as u64;
            }
            CommitOutcome::Stale { .. } => self.stale_results += 1,
        }
    }

    pub fn record_success(&mut self) {
        self.jobs_succeeded += 1;
        self.last_analyzed = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.jobs_failed += 1;
    }

    pub fn record_cancelled(&mut self) {
        self.jobs_cancelled += 1;
    }

    pub fn record_store_failure(&mut self) {
        self.store_failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_metrics_snapshot() {
        let metrics = SchedulerMetrics::default();
        metrics.record_accepted(3);
        metrics.record_launch(false);
        metrics.record_launch(true);
        metrics.record_fan_out_drop();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.changes_accepted, 3);
        assert_eq!(snapshot.batches_launched, 1);
        assert_eq!(snapshot.full_analyses_launched, 1);
        assert_eq!(snapshot.dropped_fan_out, 1);
        assert_eq!(snapshot.launch_failures, 0);
    }

    #[test]
    fn test_analysis_metrics_record_commit() {
        let mut metrics = AnalysisMetrics::new();
        metrics.record_commit(&CommitOutcome::Applied {
            generation: 1,
            created: 2,
            updated: 1,
            deleted: 0,
            rejected: 1,
        });
        metrics.record_commit(&CommitOutcome::Stale {
            generation: 1,
            applied: 2,
        });
        metrics.record_success();

        assert_eq!(metrics.files_reconciled, 1);
        assert_eq!(metrics.markers_created, 2);
        assert_eq!(metrics.issues_rejected, 1);
        assert_eq!(metrics.stale_results, 1);
        assert!(metrics.last_analyzed.is_some());
    }

    #[test]
    fn test_scope_status_serializes() {
        let status = ScopeStatus {
            scope: ScopeId::from("demo"),
            phase: ScopePhase::Pending,
            pending_files: 2,
            saturated: false,
            full_analysis_queued: false,
            last_generation: 3,
            running_generation: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"phase\":\"Pending\""));
        assert_eq!(ScopePhase::Running.to_string(), "Running");
    }
}
