use async_trait::async_trait;
use dashmap::DashMap;
use reanalyze_core::{MarkerOp, MarkerSnapshot, MarkerStore, MarkerStoreError, ScopeId};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Marker store kept in process memory. Serves headless hosts and tests;
/// an IDE binds its own editor-backed store instead.
#[derive(Debug, Default)]
pub struct InMemoryMarkerStore {
    snapshots: DashMap<(ScopeId, PathBuf), MarkerSnapshot>,
    history: DashMap<(ScopeId, PathBuf), Vec<MarkerOp>>,
    unavailable: AtomicBool,
}

impl InMemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markers currently shown for `file`.
    pub fn markers(&self, scope: &ScopeId, file: &Path) -> MarkerSnapshot {
        self.snapshots
            .get(&(scope.clone(), file.to_path_buf()))
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Every operation ever applied to `file`, in order.
    pub fn applied_ops(&self, scope: &ScopeId, file: &Path) -> Vec<MarkerOp> {
        self.history
            .get(&(scope.clone(), file.to_path_buf()))
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    pub fn files(&self, scope: &ScopeId) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .snapshots
            .iter()
            .filter(|e| &e.key().0 == scope)
            .map(|e| e.key().1.clone())
            .collect();
        files.sort();
        files
    }

    /// Make every call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), MarkerStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MarkerStoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MarkerStore for InMemoryMarkerStore {
    async fn load(&self, scope: &ScopeId, file: &Path) -> Result<MarkerSnapshot, MarkerStoreError> {
        self.check_available()?;
        Ok(self.markers(scope, file))
    }

    async fn apply(&self, scope: &ScopeId, file: &Path, ops: &[MarkerOp]) -> Result<(), MarkerStoreError> {
        self.check_available()?;
        let key = (scope.clone(), file.to_path_buf());
        let next = self.markers(scope, file).apply(ops);
        self.snapshots.insert(key.clone(), next);
        self.history.entry(key).or_default().extend(ops.iter().cloned());
        Ok(())
    }
}
