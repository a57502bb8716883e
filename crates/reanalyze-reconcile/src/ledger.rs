use dashmap::DashMap;
use reanalyze_core::{Generation, MarkerSnapshot, MarkerStore, MarkerStoreError, RawIssue, ScopeId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::anchor::anchor_issues;
use crate::diff::PositionDiff;
use crate::reconciler::reconcile;

#[derive(Debug, Default)]
struct LedgerEntry {
    loaded: bool,
    snapshot: MarkerSnapshot,
    applied_generation: Option<Generation>,
    analyzed_content: Option<Arc<str>>,
}

/// Result of committing one file's issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied {
        generation: Generation,
        created: usize,
        updated: usize,
        deleted: usize,
        rejected: usize,
    },
    /// A newer generation already committed this file.
    Stale {
        generation: Generation,
        applied: Generation,
    },
}

impl CommitOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommitOutcome::Applied { .. })
    }
}

/// Serializes reconciliation per (scope, file) and keeps the last committed
/// snapshot and analyzed content for each.
pub struct MarkerLedger {
    store: Arc<dyn MarkerStore>,
    entries: DashMap<(ScopeId, PathBuf), Arc<Mutex<LedgerEntry>>>,
}

impl MarkerLedger {
    pub fn new(store: Arc<dyn MarkerStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MarkerStore> {
        &self.store
    }

    /// Reconcile `issues` for `file` against what is currently shown and push
    /// the resulting operations to the store. Nothing is recorded when the
    /// store fails, so the next generation diffs against the same baseline.
    pub async fn commit(
        &self,
        scope: &ScopeId,
        file: &Path,
        generation: Generation,
        issues: Vec<RawIssue>,
        content: Option<Arc<str>>,
    ) -> Result<CommitOutcome, MarkerStoreError> {
        let slot = self
            .entries
            .entry((scope.clone(), file.to_path_buf()))
            .or_default()
            .clone();
        let mut entry = slot.lock().await;

        if let Some(applied) = entry.applied_generation {
            if generation < applied {
                debug!(
                    "Discarding generation {} results for {:?} in scope {}: generation {} already committed",
                    generation, file, scope, applied
                );
                return Ok(CommitOutcome::Stale { generation, applied });
            }
        }

        if !entry.loaded {
            entry.snapshot = self.store.load(scope, file).await?;
            entry.loaded = true;
        }

        let (anchored, mut rejected) = anchor_issues(file, content.as_deref(), issues);
        let position_diff = match (&entry.analyzed_content, &content) {
            (Some(old), Some(new)) if old != new => Some(PositionDiff::compute(old, new)),
            _ => None,
        };
        let reconciliation = reconcile(file, &entry.snapshot, &anchored, position_diff.as_ref());
        rejected.extend(reconciliation.rejected.iter().cloned());
        for error in &rejected {
            warn!("Dropping issue in scope {}: {}", scope, error);
        }

        if !reconciliation.ops.is_empty() {
            self.store.apply(scope, file, &reconciliation.ops).await?;
        }

        entry.snapshot = entry.snapshot.apply(&reconciliation.ops);
        entry.applied_generation = Some(generation);
        if content.is_some() {
            entry.analyzed_content = content;
        }

        debug!(
            "Committed generation {} for {:?}: {} created, {} updated, {} deleted",
            generation,
            file,
            reconciliation.created(),
            reconciliation.updated(),
            reconciliation.deleted()
        );
        Ok(CommitOutcome::Applied {
            generation,
            created: reconciliation.created(),
            updated: reconciliation.updated(),
            deleted: reconciliation.deleted(),
            rejected: rejected.len(),
        })
    }

    /// Last committed snapshot, if the file was ever committed.
    pub async fn snapshot(&self, scope: &ScopeId, file: &Path) -> Option<MarkerSnapshot> {
        let slot = self
            .entries
            .get(&(scope.clone(), file.to_path_buf()))
            .map(|e| e.value().clone())?;
        let entry = slot.lock().await;
        entry.loaded.then(|| entry.snapshot.clone())
    }

    pub async fn applied_generation(&self, scope: &ScopeId, file: &Path) -> Option<Generation> {
        let slot = self
            .entries
            .get(&(scope.clone(), file.to_path_buf()))
            .map(|e| e.value().clone())?;
        let generation = slot.lock().await.applied_generation;
        generation
    }

    /// Drop everything remembered for a closed scope.
    pub fn forget_scope(&self, scope: &ScopeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(s, _), _| s != scope);
        before - self.entries.len()
    }

    pub fn tracked_files(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryMarkerStore;
    use reanalyze_core::{MarkerOp, Severity, TextRange};

    const V1: &str = "class Foo {\n  int x = 1;\n}\n";
    const V2: &str = "class Foo {\n  // added\n  int x = 1;\n}\n";

    fn issue(line: u32) -> RawIssue {
        RawIssue::new("java:S1", "Foo.java", TextRange::new(line, 2, line, 12), "Unused", Severity::Minor)
    }

    #[tokio::test]
    async fn test_commit_tracks_moved_issue() {
        let store = Arc::new(InMemoryMarkerStore::new());
        let ledger = MarkerLedger::new(store.clone());
        let scope = ScopeId::from("p");
        let file = Path::new("Foo.java");

        let first = ledger.commit(&scope, file, 1, vec![issue(2)], Some(Arc::from(V1))).await.unwrap();
        assert!(matches!(first, CommitOutcome::Applied { created: 1, .. }));

        let second = ledger.commit(&scope, file, 2, vec![issue(3)], Some(Arc::from(V2))).await.unwrap();
        assert!(matches!(second, CommitOutcome::Applied { created: 0, updated: 1, deleted: 0, .. }));

        let shown = store.markers(&scope, file);
        assert_eq!(shown.len(), 1);
        assert_eq!(shown.markers[0].range.start_line, 3);
        assert_eq!(ledger.snapshot(&scope, file).await, Some(shown));
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let store = Arc::new(InMemoryMarkerStore::new());
        let ledger = MarkerLedger::new(store.clone());
        let scope = ScopeId::from("p");
        let file = Path::new("Foo.java");

        ledger.commit(&scope, file, 5, vec![issue(2)], Some(Arc::from(V1))).await.unwrap();
        let outcome = ledger.commit(&scope, file, 4, vec![], Some(Arc::from(V1))).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Stale { generation: 4, applied: 5 });
        assert_eq!(store.markers(&scope, file).len(), 1);
        assert_eq!(ledger.applied_generation(&scope, file).await, Some(5));
    }

    #[tokio::test]
    async fn test_store_failure_keeps_baseline() {
        let store = Arc::new(InMemoryMarkerStore::new());
        let ledger = MarkerLedger::new(store.clone());
        let scope = ScopeId::from("p");
        let file = Path::new("Foo.java");

        store.set_unavailable(true);
        assert!(ledger.commit(&scope, file, 1, vec![issue(2)], Some(Arc::from(V1))).await.is_err());
        assert_eq!(ledger.applied_generation(&scope, file).await, None);

        store.set_unavailable(false);
        let outcome = ledger.commit(&scope, file, 1, vec![issue(2)], Some(Arc::from(V1))).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Applied { created: 1, .. }));
    }

    #[tokio::test]
    async fn test_baseline_loaded_from_store() {
        let store = Arc::new(InMemoryMarkerStore::new());
        let scope = ScopeId::from("p");
        let file = Path::new("Foo.java");

        // Markers persisted by an earlier session.
        let earlier = MarkerLedger::new(store.clone());
        earlier.commit(&scope, file, 1, vec![issue(2)], Some(Arc::from(V1))).await.unwrap();

        let ledger = MarkerLedger::new(store.clone());
        ledger.commit(&scope, file, 1, vec![], Some(Arc::from(V1))).await.unwrap();
        let ops = store.applied_ops(&scope, file);
        assert!(matches!(ops.last(), Some(MarkerOp::Delete { .. })));
        assert!(store.markers(&scope, file).is_empty());
    }

    #[tokio::test]
    async fn test_forget_scope() {
        let ledger = MarkerLedger::new(Arc::new(InMemoryMarkerStore::new()));
        let a = ScopeId::from("a");
        let b = ScopeId::from("b");
        ledger.commit(&a, Path::new("A.java"), 1, vec![], None).await.unwrap();
        ledger.commit(&b, Path::new("B.java"), 1, vec![], None).await.unwrap();

        assert_eq!(ledger.forget_scope(&a), 1);
        assert_eq!(ledger.tracked_files(), 1);
        assert_eq!(ledger.snapshot(&a, Path::new("A.java")).await, None);
    }
}
