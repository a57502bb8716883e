use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Stable identifier of an analysis unit (a project or sub-module).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        };
        write!(f, "{}", s)
    }
}

/// A raw resource change notification, consumed once by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub scope: ScopeId,
}

impl ChangeEvent {
    pub fn new(scope: impl Into<ScopeId>, path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            scope: scope.into(),
        }
    }

    pub fn added(scope: impl Into<ScopeId>, path: impl Into<PathBuf>) -> Self {
        Self::new(scope, path, ChangeKind::Added)
    }

    pub fn modified(scope: impl Into<ScopeId>, path: impl Into<PathBuf>) -> Self {
        Self::new(scope, path, ChangeKind::Modified)
    }

    pub fn removed(scope: impl Into<ScopeId>, path: impl Into<PathBuf>) -> Self {
        Self::new(scope, path, ChangeKind::Removed)
    }
}

/// Monotonically increasing per-scope counter identifying which launched
/// batch a result belongs to.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisTrigger {
    /// Debounced batch of classified edits.
    Incremental,
    /// Explicit request; ignores the fan-out threshold and may cancel an
    /// in-flight incremental job.
    Full,
}

/// The immutable unit of work handed to an analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub scope: ScopeId,
    pub files: BTreeSet<PathBuf>,
    pub generation: Generation,
    pub trigger: AnalysisTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Minor,
    Major,
    Critical,
    Blocker,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
            Severity::Blocker => "blocker",
        };
        write!(f, "{}", s)
    }
}

/// Lines are 1-based, offsets are 0-based character columns within a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start_line: u32,
    pub start_offset: u32,
    pub end_line: u32,
    pub end_offset: u32,
}

impl TextRange {
    pub fn new(start_line: u32, start_offset: u32, end_line: u32, end_offset: u32) -> Self {
        Self {
            start_line,
            start_offset,
            end_line,
            end_offset,
        }
    }

    /// Range covering a whole line up to `len` characters.
    pub fn line(line: u32, len: u32) -> Self {
        Self::new(line, 0, line, len)
    }

    pub fn is_well_formed(&self) -> bool {
        self.start_line >= 1
            && (self.start_line, self.start_offset) <= (self.end_line, self.end_offset)
    }

    /// Same range moved to begin on `start_line`, keeping offsets.
    pub fn shifted_to(&self, start_line: u32) -> Self {
        let height = self.end_line - self.start_line;
        Self::new(
            start_line,
            self.start_offset,
            start_line + height,
            self.end_offset,
        )
    }
}

impl fmt::Display for TextRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start_line, self.start_offset, self.end_line, self.end_offset
        )
    }
}

/// One finding produced by the analysis backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIssue {
    pub rule_key: String,
    pub file: PathBuf,
    pub range: TextRange,
    pub message: String,
    pub severity: Severity,
    /// Rule-specific anchor text used for identity. Filled from the
    /// analyzed content when the backend does not supply one.
    #[serde(default)]
    pub anchor: Option<String>,
}

impl RawIssue {
    pub fn new(
        rule_key: impl Into<String>,
        file: impl Into<PathBuf>,
        range: TextRange,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            rule_key: rule_key.into(),
            file: file.into(),
            range,
            message: message.into(),
            severity,
            anchor: None,
        }
    }

    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }
}

/// Key correlating a marker across re-analyses regardless of line drift.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueIdentity {
    pub rule_key: String,
    pub anchor_hash: String,
    /// 0 for the first issue with this key in a file, then 1, 2, ...
    pub occurrence: u32,
}

impl IssueIdentity {
    pub fn with_occurrence(&self, occurrence: u32) -> Self {
        Self {
            occurrence,
            ..self.clone()
        }
    }
}

impl fmt::Display for IssueIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.rule_key, self.anchor_hash)?;
        if self.occurrence > 0 {
            write!(f, "#{}", self.occurrence)?;
        }
        Ok(())
    }
}

/// IDE-local state the backend does not own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserState {
    #[default]
    Open,
    ResolvedLocally,
    IgnoredLocally,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub identity: IssueIdentity,
    pub range: TextRange,
    pub rule_key: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub user_state: UserState,
}

/// Markers currently shown for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSnapshot {
    pub markers: Vec<Marker>,
}

impl MarkerSnapshot {
    pub fn new(markers: Vec<Marker>) -> Self {
        Self { markers }
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn get(&self, identity: &IssueIdentity) -> Option<&Marker> {
        self.markers.iter().find(|m| &m.identity == identity)
    }

    /// Snapshot that results from applying `ops` to this one.
    pub fn apply(&self, ops: &[MarkerOp]) -> MarkerSnapshot {
        let mut markers = self.markers.clone();
        for op in ops {
            match op {
                MarkerOp::Create(marker) => {
                    markers.retain(|m| m.identity != marker.identity);
                    markers.push(marker.clone());
                }
                MarkerOp::Update { identity, marker } => {
                    markers.retain(|m| &m.identity != identity && m.identity != marker.identity);
                    markers.push(marker.clone());
                }
                MarkerOp::Delete { identity, .. } => {
                    markers.retain(|m| &m.identity != identity);
                }
            }
        }
        markers.sort_by(|a, b| {
            a.range
                .cmp(&b.range)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        MarkerSnapshot { markers }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeleteReason {
    /// The line still exists but the issue is gone.
    IssueResolved,
    /// The marker's line no longer exists in the current content.
    LineVanished,
}

/// Instruction for the marker store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerOp {
    Create(Marker),
    /// `identity` is the marker being updated; `marker` carries the new
    /// position and content, and may be re-keyed to a new identity.
    Update {
        identity: IssueIdentity,
        marker: Marker,
    },
    Delete {
        identity: IssueIdentity,
        reason: DeleteReason,
    },
}

impl MarkerOp {
    pub fn identity(&self) -> &IssueIdentity {
        match self {
            MarkerOp::Create(marker) => &marker.identity,
            MarkerOp::Update { identity, .. } => identity,
            MarkerOp::Delete { identity, .. } => identity,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, MarkerOp::Create(_))
    }

    pub fn is_update(&self) -> bool {
        matches!(self, MarkerOp::Update { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, MarkerOp::Delete { .. })
    }
}
