use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use reanalyze_cache::{ConfigScopeCache, ConfiguratorRegistry, ScopeCatalog, ScopeMetadata};
use reanalyze_core::{
    AnalysisBackend, AnalysisError, AnalysisRequest, ChangeClassifier, ChangeEvent, ConfigError,
    ContentProvider, FsResourceInspector, MarkerStore, ReanalyzeConfig, ReanalyzeError,
    ResourceInspector, ScopeId,
};
use reanalyze_reconcile::MarkerLedger;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::health::{BackendHealth, HealthStatus};
use crate::job::{AnalysisJob, FsContentProvider, JobOutput};
use crate::scheduler::{JobExecutor, JobScheduler, SchedulerPolicy};
use crate::status::{AnalysisMetrics, SchedulerMetricsSnapshot, ScopeStatus};

/// Runs launched requests: analysis job, then per-file reconciliation.
pub struct AnalysisRunner {
    job: RwLock<Arc<AnalysisJob>>,
    backend: Arc<dyn AnalysisBackend>,
    content: Arc<dyn ContentProvider>,
    ledger: Arc<MarkerLedger>,
    health: Arc<BackendHealth>,
    metrics: Mutex<AnalysisMetrics>,
}

impl AnalysisRunner {
    fn new(
        backend: Arc<dyn AnalysisBackend>,
        content: Arc<dyn ContentProvider>,
        ledger: Arc<MarkerLedger>,
        health: Arc<BackendHealth>,
        config: &ReanalyzeConfig,
    ) -> Self {
        let job = AnalysisJob::new(backend.clone(), content.clone(), config.scheduler.job_timeout());
        Self {
            job: RwLock::new(Arc::new(job)),
            backend,
            content,
            ledger,
            health,
            metrics: Mutex::new(AnalysisMetrics::new()),
        }
    }

    fn set_timeout(&self, timeout: std::time::Duration) {
        let job = AnalysisJob::new(self.backend.clone(), self.content.clone(), timeout);
        *self.job.write() = Arc::new(job);
    }

    async fn commit(&self, request: &AnalysisRequest, output: JobOutput) {
        let commits = output.files.into_iter().map(|(file, result)| async move {
            let outcome = self
                .ledger
                .commit(&request.scope, &file, request.generation, result.issues, result.content)
                .await;
            (file, outcome)
        });

        for (file, outcome) in join_all(commits).await {
            match outcome {
                Ok(outcome) => self.metrics.lock().record_commit(&outcome),
                Err(e) => {
                    warn!(
                        "Marker store rejected generation {} for {:?}, no markers changed: {}",
                        request.generation, file, e
                    );
                    self.metrics.lock().record_store_failure();
                }
            }
        }
    }
}

#[async_trait]
impl JobExecutor for AnalysisRunner {
    async fn execute(&self, request: AnalysisRequest, cancel: CancellationToken) {
        let job = self.job.read().clone();
        match job.run(&request, &cancel).await {
            Ok(output) => {
                self.health.record_success();
                info!(
                    "Generation {} for scope {} produced {} issues in {:?}",
                    request.generation,
                    request.scope,
                    output.issue_count(),
                    output.elapsed
                );
                self.commit(&request, output).await;
                self.metrics.lock().record_success();
            }
            Err(AnalysisError::Cancelled) => {
                info!("Generation {} for scope {} cancelled", request.generation, request.scope);
                self.metrics.lock().record_cancelled();
            }
            Err(e) => {
                match &e {
                    AnalysisError::BackendUnavailable(reason) => self.health.record_unavailable(reason),
                    _ => error!(
                        "Analysis of generation {} for scope {} failed ({}): {}",
                        request.generation,
                        request.scope,
                        e.kind(),
                        e
                    ),
                }
                self.metrics.lock().record_failure();
            }
        }
    }
}

/// Snapshot of everything the context tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStatus {
    pub scopes: Vec<ScopeStatus>,
    pub scheduler: SchedulerMetricsSnapshot,
    pub analysis: AnalysisMetrics,
    pub health: HealthStatus,
    pub tracked_files: usize,
}

/// Outcome of feeding one batch of change events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub events: usize,
    pub accepted: usize,
    pub outside_sources: usize,
}

/// Synchronous half of change handling: cache refresh, classification and
/// hand-off to the scheduler. File-system checks and configurator calls
/// make it blocking.
struct ChangeIntake {
    classifier: ChangeClassifier,
    inspector: Arc<dyn ResourceInspector>,
    catalog: Arc<ScopeCatalog>,
    scheduler: JobScheduler,
    project_roots: RwLock<HashMap<ScopeId, PathBuf>>,
}

impl ChangeIntake {
    fn ingest(&self, events: &[ChangeEvent]) -> IngestSummary {
        let mut summary = IngestSummary {
            events: events.len(),
            ..Default::default()
        };

        for event in events {
            let impact = self.classifier.cache_impact(event);
            if impact.structural {
                debug!("Build file {:?} changed, refreshing scope {}", event.path, event.scope);
                self.catalog.invalidate_structure(&event.scope);
            } else if impact.file_listing {
                self.catalog.invalidate_file_listing(&event.scope);
            }
        }

        let scopes: BTreeSet<&ScopeId> = events.iter().map(|e| &e.scope).collect();
        for scope in scopes {
            let metadata = self.catalog.metadata(scope);
            self.inspector.set_scope_roots(scope, &self.roots_of(scope, &metadata));
        }

        for (scope, files) in self.classifier.classify_batch(events) {
            let metadata = self.catalog.metadata(&scope);
            let (inside, outside): (Vec<PathBuf>, Vec<PathBuf>) =
                files.into_iter().partition(|f| metadata.covers(f));
            if !outside.is_empty() {
                debug!(
                    "Ignoring {} changes outside the source roots of scope {}",
                    outside.len(),
                    scope
                );
            }
            summary.outside_sources += outside.len();
            summary.accepted += inside.len();
            self.scheduler.submit(&scope, inside);
        }
        summary
    }

    /// Opened project root first, then the configured source roots.
    fn roots_of(&self, scope: &ScopeId, metadata: &ScopeMetadata) -> Vec<PathBuf> {
        self.project_roots
            .read()
            .get(scope)
            .into_iter()
            .chain(metadata.source_roots.iter())
            .cloned()
            .collect()
    }
}

/// Owns the classifier, cache, scheduler and marker ledger for one session.
/// Every collaborator is reached through this object; there are no globals.
pub struct AnalysisContext {
    config: RwLock<ReanalyzeConfig>,
    intake: Arc<ChangeIntake>,
    runner: Arc<AnalysisRunner>,
    ledger: Arc<MarkerLedger>,
    health: Arc<BackendHealth>,
}

impl AnalysisContext {
    pub fn builder(
        config: ReanalyzeConfig,
        backend: Arc<dyn AnalysisBackend>,
        store: Arc<dyn MarkerStore>,
    ) -> AnalysisContextBuilder {
        AnalysisContextBuilder {
            config,
            backend,
            store,
            content: None,
            inspector: None,
            registry: ConfiguratorRegistry::new(),
        }
    }

    /// Register the directory a scope lives in. Hidden and derived checks
    /// look only at path components below it (or below a deeper source
    /// root), never at where the project sits on disk.
    pub fn open_scope(&self, scope: ScopeId, root: impl Into<PathBuf>) {
        let root = root.into();
        info!("Opened scope {} at {:?}", scope, root);
        self.intake.project_roots.write().insert(scope, root);
    }

    /// Classify events, refresh affected cache entries and hand accepted
    /// files to the scheduler. Returns without waiting for any analysis,
    /// but may block on file-system checks and configurator calls; async
    /// callers should go through [`pump`](Self::pump).
    pub fn ingest(&self, events: &[ChangeEvent]) -> IngestSummary {
        self.intake.ingest(events)
    }

    /// Analyze `files`, or every source file of the scope when `None`.
    pub async fn request_full_analysis(
        &self,
        scope: &ScopeId,
        files: Option<BTreeSet<PathBuf>>,
    ) -> Result<(), ReanalyzeError> {
        let files = match files {
            Some(files) => files,
            None => {
                let catalog = self.intake.catalog.clone();
                let target = scope.clone();
                let listing = tokio::task::spawn_blocking(move || catalog.files(&target))
                    .await
                    .map_err(|e| ReanalyzeError::LaunchFailed {
                        scope: scope.clone(),
                        reason: e.to_string(),
                    })?;
                listing.iter().cloned().collect()
            }
        };
        info!("Full analysis requested for scope {} ({} files)", scope, files.len());
        self.intake.scheduler.request_full_analysis(scope, files);
        Ok(())
    }

    /// The scope is gone: stop its work and drop everything kept for it.
    pub fn close_scope(&self, scope: &ScopeId) {
        self.intake.scheduler.close_scope(scope);
        self.intake.catalog.invalidate(scope);
        self.intake.project_roots.write().remove(scope);
        self.intake.inspector.remove_scope(scope);
        let forgotten = self.ledger.forget_scope(scope);
        debug!("Forgot {} tracked files of scope {}", forgotten, scope);
    }

    /// Drain change batches until the sender side closes. Each batch is
    /// ingested on the blocking pool so timers of other scopes keep firing.
    pub async fn pump(&self, mut changes: mpsc::UnboundedReceiver<Vec<ChangeEvent>>) {
        while let Some(events) = changes.recv().await {
            let intake = self.intake.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || intake.ingest(&events)).await {
                error!("Change batch was not ingested: {}", e);
            }
        }
        debug!("Change source closed");
    }

    /// Apply new tuning values without rebuilding the context.
    pub fn reconfigure(&self, config: ReanalyzeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.intake
            .scheduler
            .set_policy(SchedulerPolicy::from(&config.scheduler));
        self.intake.catalog.set_ttls(config.cache.clone());
        self.health.set_threshold(config.health.escalation_threshold);
        self.runner.set_timeout(config.scheduler.job_timeout());
        *self.config.write() = config;
        Ok(())
    }

    pub fn config(&self) -> ReanalyzeConfig {
        self.config.read().clone()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.intake.scheduler
    }

    pub fn catalog(&self) -> &Arc<ScopeCatalog> {
        &self.intake.catalog
    }

    pub fn ledger(&self) -> &Arc<MarkerLedger> {
        &self.ledger
    }

    pub fn health(&self) -> &Arc<BackendHealth> {
        &self.health
    }

    pub fn status(&self) -> ContextStatus {
        let scheduler = &self.intake.scheduler;
        ContextStatus {
            scopes: scheduler
                .scopes()
                .iter()
                .filter_map(|s| scheduler.status(s))
                .collect(),
            scheduler: scheduler.metrics(),
            analysis: self.runner.metrics.lock().clone(),
            health: self.health.status(),
            tracked_files: self.ledger.tracked_files(),
        }
    }
}

pub struct AnalysisContextBuilder {
    config: ReanalyzeConfig,
    backend: Arc<dyn AnalysisBackend>,
    store: Arc<dyn MarkerStore>,
    content: Option<Arc<dyn ContentProvider>>,
    inspector: Option<Arc<dyn ResourceInspector>>,
    registry: ConfiguratorRegistry,
}

impl AnalysisContextBuilder {
    /// Defaults to reading saved files from disk.
    pub fn content_provider(mut self, content: Arc<dyn ContentProvider>) -> Self {
        self.content = Some(content);
        self
    }

    /// Defaults to a file-system inspector built from the classifier config.
    pub fn resource_inspector(mut self, inspector: Arc<dyn ResourceInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn configurators(mut self, registry: ConfiguratorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Result<AnalysisContext, ReanalyzeError> {
        self.config.validate()?;
        let config = self.config;

        let inspector: Arc<dyn ResourceInspector> = match self.inspector {
            Some(inspector) => inspector,
            None => Arc::new(FsResourceInspector::from_config(&config.classifier)?),
        };
        let classifier = ChangeClassifier::new(inspector.clone(), &config.classifier);
        let catalog = Arc::new(ScopeCatalog::new(
            Arc::new(ConfigScopeCache::new()),
            self.registry,
            config.cache.clone(),
        ));

        let ledger = Arc::new(MarkerLedger::new(self.store));
        let health = Arc::new(BackendHealth::new(config.health.escalation_threshold));
        let content = self
            .content
            .unwrap_or_else(|| Arc::new(FsContentProvider) as Arc<dyn ContentProvider>);
        let runner = Arc::new(AnalysisRunner::new(
            self.backend,
            content,
            ledger.clone(),
            health.clone(),
            &config,
        ));
        let scheduler = JobScheduler::from_config(&config.scheduler, runner.clone());

        info!(
            "Analysis context ready: debounce {:?}, max {} files per incremental batch, {} concurrent jobs",
            config.scheduler.debounce(),
            config.scheduler.max_files_per_incremental_batch,
            config.scheduler.max_concurrent_jobs
        );
        Ok(AnalysisContext {
            config: RwLock::new(config),
            intake: Arc::new(ChangeIntake {
                classifier,
                inspector,
                catalog,
                scheduler,
                project_roots: RwLock::new(HashMap::new()),
            }),
            runner,
            ledger,
            health,
        })
    }
}
