use reanalyze_core::{IssueIdentity, RawIssue, ReconciliationError, TextRange};
use sha2::{Digest, Sha256};
use std::path::Path;

const HASH_LEN: usize = 16;

/// Fill in anchors from the analyzed content. Issues that already carry an
/// anchor are kept as-is. Issues whose range falls outside `content` are
/// rejected; without content, anchors stay empty and identity falls back to
/// the message.
pub fn anchor_issues(
    file: &Path,
    content: Option<&str>,
    issues: Vec<RawIssue>,
) -> (Vec<RawIssue>, Vec<ReconciliationError>) {
    let Some(content) = content else {
        return (issues, Vec::new());
    };
    let lines: Vec<&str> = content.lines().collect();

    let mut anchored = Vec::with_capacity(issues.len());
    let mut rejected = Vec::new();
    for mut issue in issues {
        if issue.anchor.is_some() || !issue.range.is_well_formed() {
            anchored.push(issue);
            continue;
        }
        match range_text(&lines, &issue.range) {
            Some(text) => {
                issue.anchor = Some(text);
                anchored.push(issue);
            }
            None => rejected.push(ReconciliationError::OffsetOutOfRange {
                rule_key: issue.rule_key.clone(),
                file: file.to_path_buf(),
                range: issue.range.to_string(),
            }),
        }
    }
    (anchored, rejected)
}

/// Whitespace-normalized text covered by `range`. A zero-width range anchors
/// on its whole start line.
fn range_text(lines: &[&str], range: &TextRange) -> Option<String> {
    let start = lines.get(range.start_line as usize - 1)?;
    let end = lines.get(range.end_line as usize - 1)?;
    if range.start_offset as usize > start.chars().count()
        || range.end_offset as usize > end.chars().count()
    {
        return None;
    }

    let mut covered = String::new();
    for line_no in range.start_line..=range.end_line {
        let line = lines[line_no as usize - 1];
        let from = if line_no == range.start_line {
            range.start_offset as usize
        } else {
            0
        };
        let to = if line_no == range.end_line {
            range.end_offset as usize
        } else {
            usize::MAX
        };
        covered.extend(line.chars().skip(from).take(to.saturating_sub(from)));
        covered.push('\n');
    }

    let normalized = normalize(&covered);
    if normalized.is_empty() {
        Some(normalize(start))
    } else {
        Some(normalized)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Base identity of an issue, before occurrence numbering.
pub fn identity_of(issue: &RawIssue) -> IssueIdentity {
    let anchor = issue
        .anchor
        .as_deref()
        .filter(|a| !a.is_empty())
        .unwrap_or(&issue.message);

    let mut hasher = Sha256::new();
    hasher.update(issue.rule_key.as_bytes());
    hasher.update([0u8]);
    hasher.update(anchor.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

    IssueIdentity {
        rule_key: issue.rule_key.clone(),
        anchor_hash: hex[..HASH_LEN].to_string(),
        occurrence: 0,
    }
}
