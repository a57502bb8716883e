//! Debounced per-scope scheduling of incremental analysis, the cancellable
//! analysis job, and the context object that wires classification, caching,
//! scheduling and marker reconciliation together.

pub mod context;
pub mod health;
pub mod job;
pub mod scheduler;
pub mod status;
pub mod watch;

pub use context::{AnalysisContext, AnalysisContextBuilder, AnalysisRunner, ContextStatus, IngestSummary};
pub use health::{BackendHealth, HealthState, HealthStatus};
pub use job::{AnalysisJob, FileResult, FsContentProvider, JobOutput};
pub use scheduler::{JobExecutor, JobScheduler, SchedulerPolicy};
pub use status::{AnalysisMetrics, SchedulerMetrics, SchedulerMetricsSnapshot, ScopePhase, ScopeStatus};
pub use watch::{map_event, FsChangeSource, WatchError};
