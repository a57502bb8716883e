use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ScopeId;

#[derive(Error, Debug)]
pub enum ReanalyzeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    CacheCompute(#[from] CacheComputeError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error(transparent)]
    MarkerStore(#[from] MarkerStoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Scope not found: {0}")]
    ScopeNotFound(ScopeId),

    #[error("Job launch failed for {scope}: {reason}")]
    LaunchFailed { scope: ScopeId, reason: String },
}

pub type Result<T> = std::result::Result<T, ReanalyzeError>;

/// The attribute check behind a classification decision failed.
/// Callers treat this as a rejection.
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("attribute check failed for {path:?}: {source}")]
    AttributeCheck {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum CacheComputeError {
    #[error("provider {provider} failed for scope {scope}: {reason}")]
    ProviderFailed {
        scope: ScopeId,
        provider: String,
        reason: String,
    },
}

/// Failure of a single analysis job. None of these are retried; the next
/// change event for the scope is the retry trigger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("analysis backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("analysis failed: {0}")]
    InternalFailure(String),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::BackendUnavailable(_) => "backend_unavailable",
            AnalysisError::Cancelled => "cancelled",
            AnalysisError::Timeout(_) => "timeout",
            AnalysisError::InternalFailure(_) => "internal_failure",
        }
    }
}

/// A malformed raw issue. Only the offending issue is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("issue {rule_key} in {file:?} has an empty rule key")]
    EmptyRuleKey { rule_key: String, file: PathBuf },

    #[error("issue {rule_key} in {file:?} has an inverted or zero-based range {range}")]
    InvalidRange {
        rule_key: String,
        file: PathBuf,
        range: String,
    },

    #[error("issue {rule_key} in {file:?} points outside the analyzed content: {range}")]
    OffsetOutOfRange {
        rule_key: String,
        file: PathBuf,
        range: String,
    },

    #[error("issue {rule_key} reported for {file:?} but reconciled against {expected:?}")]
    WrongFile {
        rule_key: String,
        file: PathBuf,
        expected: PathBuf,
    },
}

#[derive(Error, Debug)]
pub enum MarkerStoreError {
    #[error("marker store rejected operations for {file:?}: {reason}")]
    Rejected { file: PathBuf, reason: String },

    #[error("marker store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}
