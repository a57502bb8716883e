use reanalyze_core::{
    DeleteReason, IssueIdentity, Marker, MarkerOp, MarkerSnapshot, RawIssue, ReconciliationError,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::anchor::identity_of;
use crate::diff::PositionDiff;

/// Marker operations for one file plus the issues that were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub ops: Vec<MarkerOp>,
    pub rejected: Vec<ReconciliationError>,
}

impl Reconciliation {
    pub fn created(&self) -> usize {
        self.ops.iter().filter(|op| op.is_create()).count()
    }

    pub fn updated(&self) -> usize {
        self.ops.iter().filter(|op| op.is_update()).count()
    }

    pub fn deleted(&self) -> usize {
        self.ops.iter().filter(|op| op.is_delete()).count()
    }
}

/// Diff `new_issues` against the markers currently shown for `file`.
///
/// Matching is by identity first. Issues left over are matched to a leftover
/// marker of the same rule whose old line maps through `position_diff` onto
/// the issue's start line; such a marker is updated and re-keyed. Everything
/// else becomes a create, and markers nobody claimed are deleted. User state
/// is carried across every update.
pub fn reconcile(
    file: &Path,
    previous: &MarkerSnapshot,
    new_issues: &[RawIssue],
    position_diff: Option<&PositionDiff>,
) -> Reconciliation {
    let mut rejected = Vec::new();
    let mut valid: Vec<&RawIssue> = Vec::with_capacity(new_issues.len());
    for issue in new_issues {
        match validate(file, issue) {
            Ok(()) => valid.push(issue),
            Err(e) => rejected.push(e),
        }
    }
    valid.sort_by_key(|issue| (issue.range.start_line, issue.range.start_offset));

    // Repeated keys within one file get occurrence numbers in position order.
    let mut seen: HashMap<IssueIdentity, u32> = HashMap::new();
    let candidates: Vec<(IssueIdentity, &RawIssue)> = valid
        .into_iter()
        .map(|issue| {
            let base = identity_of(issue);
            let count = seen.entry(base.clone()).or_insert(0);
            let identity = base.with_occurrence(*count);
            *count += 1;
            (identity, issue)
        })
        .collect();

    let by_identity: HashMap<&IssueIdentity, &Marker> =
        previous.markers.iter().map(|m| (&m.identity, m)).collect();
    let mut claimed: HashSet<IssueIdentity> = HashSet::new();
    let mut resolved: Vec<Option<MarkerOp>> = vec![None; candidates.len()];

    for (i, (identity, issue)) in candidates.iter().enumerate() {
        if let Some(old) = by_identity.get(identity) {
            claimed.insert(identity.clone());
            resolved[i] = Some(MarkerOp::Update {
                identity: identity.clone(),
                marker: to_marker(identity.clone(), issue, old.user_state),
            });
        }
    }

    if let Some(diff) = position_diff {
        for (i, (identity, issue)) in candidates.iter().enumerate() {
            if resolved[i].is_some() {
                continue;
            }
            let relocated = previous.markers.iter().find(|m| {
                !claimed.contains(&m.identity)
                    && m.rule_key == issue.rule_key
                    && diff.map_line(m.range.start_line).new_line() == Some(issue.range.start_line)
            });
            if let Some(old) = relocated {
                claimed.insert(old.identity.clone());
                resolved[i] = Some(MarkerOp::Update {
                    identity: old.identity.clone(),
                    marker: to_marker(identity.clone(), issue, old.user_state),
                });
            }
        }
    }

    let mut ops: Vec<MarkerOp> = candidates
        .iter()
        .zip(resolved)
        .map(|((identity, issue), op)| {
            op.unwrap_or_else(|| MarkerOp::Create(to_marker(identity.clone(), issue, Default::default())))
        })
        .collect();

    for marker in &previous.markers {
        if claimed.contains(&marker.identity) {
            continue;
        }
        let reason = match position_diff {
            Some(diff) if diff.map_line(marker.range.start_line).is_not_found() => {
                DeleteReason::LineVanished
            }
            _ => DeleteReason::IssueResolved,
        };
        ops.push(MarkerOp::Delete {
            identity: marker.identity.clone(),
            reason,
        });
    }

    Reconciliation { ops, rejected }
}

fn validate(file: &Path, issue: &RawIssue) -> Result<(), ReconciliationError> {
    if issue.rule_key.trim().is_empty() {
        return Err(ReconciliationError::EmptyRuleKey {
            rule_key: issue.rule_key.clone(),
            file: issue.file.clone(),
        });
    }
    if issue.file != file {
        return Err(ReconciliationError::WrongFile {
            rule_key: issue.rule_key.clone(),
            file: issue.file.clone(),
            expected: file.to_path_buf(),
        });
    }
    if !issue.range.is_well_formed() {
        return Err(ReconciliationError::InvalidRange {
            rule_key: issue.rule_key.clone(),
            file: issue.file.clone(),
            range: issue.range.to_string(),
        });
    }
    Ok(())
}

fn to_marker(identity: IssueIdentity, issue: &RawIssue, user_state: reanalyze_core::UserState) -> Marker {
    Marker {
        identity,
        range: issue.range,
        rule_key: issue.rule_key.clone(),
        message: issue.message.clone(),
        severity: issue.severity,
        user_state,
    }
}
