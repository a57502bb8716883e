use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::{AnalysisError, MarkerOp, MarkerSnapshot, MarkerStoreError, RawIssue, ScopeId};

/// Opaque analysis engine. Transport and rule evaluation live behind it.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(
        &self,
        scope: &ScopeId,
        files: &[PathBuf],
    ) -> std::result::Result<Vec<RawIssue>, AnalysisError>;
}

/// The IDE's problem list. Applies marker operations and is the source of
/// truth for markers when a scope is (re)loaded.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn load(
        &self,
        scope: &ScopeId,
        file: &Path,
    ) -> std::result::Result<MarkerSnapshot, MarkerStoreError>;

    async fn apply(
        &self,
        scope: &ScopeId,
        file: &Path,
        ops: &[MarkerOp],
    ) -> std::result::Result<(), MarkerStoreError>;
}

/// Reads the content an analysis runs against (saved file or open buffer).
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// `Ok(None)` when the file no longer exists.
    async fn read(&self, path: &Path) -> std::io::Result<Option<String>>;
}
