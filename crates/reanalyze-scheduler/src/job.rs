use async_trait::async_trait;
use reanalyze_core::{AnalysisBackend, AnalysisError, AnalysisRequest, ContentProvider, RawIssue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reads saved file content from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsContentProvider;

#[async_trait]
impl ContentProvider for FsContentProvider {
    async fn read(&self, path: &Path) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Per-file result of one analysis run.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub issues: Vec<RawIssue>,
    /// Content the issues were computed against; `None` when the file
    /// could not be read.
    pub content: Option<Arc<str>>,
}

#[derive(Debug, Clone)]
pub struct JobOutput {
    /// Every requested file, including those with no issues.
    pub files: BTreeMap<PathBuf, FileResult>,
    pub elapsed: Duration,
}

impl JobOutput {
    pub fn issue_count(&self) -> usize {
        self.files.values().map(|f| f.issues.len()).sum()
    }
}

/// One analysis pass over a request's file set.
pub struct AnalysisJob {
    backend: Arc<dyn AnalysisBackend>,
    content: Arc<dyn ContentProvider>,
    timeout: Duration,
}

impl AnalysisJob {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        content: Arc<dyn ContentProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            content,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the request against the backend. Stops at the first of
    /// completion, cancellation or the wall-clock timeout.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> Result<JobOutput, AnalysisError> {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        let started = Instant::now();

        let files = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.analyze(request)) => match outcome {
                Ok(result) => result?,
                Err(_) => return Err(AnalysisError::Timeout(self.timeout)),
            },
        };

        Ok(JobOutput {
            files,
            elapsed: started.elapsed(),
        })
    }

    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<BTreeMap<PathBuf, FileResult>, AnalysisError> {
        let mut files = BTreeMap::new();
        for path in &request.files {
            let content = match self.content.read(path).await {
                Ok(text) => text.map(Arc::<str>::from),
                Err(e) => {
                    warn!("Could not snapshot {:?} before analysis: {}", path, e);
                    None
                }
            };
            files.insert(
                path.clone(),
                FileResult {
                    issues: Vec::new(),
                    content,
                },
            );
        }

        let targets: Vec<PathBuf> = request.files.iter().cloned().collect();
        let issues = self.backend.analyze(&request.scope, &targets).await?;
        debug!(
            "Backend returned {} issues for {} files in scope {} (generation {})",
            issues.len(),
            targets.len(),
            request.scope,
            request.generation
        );

        for issue in issues {
            match files.get_mut(&issue.file) {
                Some(result) => result.issues.push(issue),
                None => warn!(
                    "Dropping issue {} for {:?}: file not part of generation {} request",
                    issue.rule_key, issue.file, request.generation
                ),
            }
        }
        Ok(files)
    }
}
