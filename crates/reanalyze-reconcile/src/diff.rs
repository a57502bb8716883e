use similar::{DiffOp, TextDiff};

/// Where an old line ended up in the new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMapping {
    /// Identical line at this (1-based) position.
    Unchanged(u32),
    /// Line rewritten in place: part of a replacement hunk of equal height.
    Edited(u32),
    NotFound,
}

impl LineMapping {
    pub fn new_line(&self) -> Option<u32> {
        match self {
            LineMapping::Unchanged(n) | LineMapping::Edited(n) => Some(*n),
            LineMapping::NotFound => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LineMapping::NotFound)
    }
}

/// Immutable old-line to new-line mapping between the content used for
/// the previous analysis and the current content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionDiff {
    // index = old line - 1
    mapping: Vec<LineMapping>,
}

impl PositionDiff {
    pub fn compute(old: &str, new: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let mut mapping = vec![LineMapping::NotFound; diff.old_slices().len()];

        let ops = diff.ops();
        let mut i = 0;
        while i < ops.len() {
            match ops[i] {
                DiffOp::Equal {
                    old_index,
                    new_index,
                    len,
                } => {
                    for k in 0..len {
                        mapping[old_index + k] = LineMapping::Unchanged((new_index + k + 1) as u32);
                    }
                }
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => map_edited(&mut mapping, old_index, old_len, new_index, new_len),
                DiffOp::Delete {
                    old_index,
                    old_len,
                    new_index,
                } => {
                    // A delete directly followed by an insert is a replacement.
                    if let Some(DiffOp::Insert { new_len, .. }) = ops.get(i + 1) {
                        map_edited(&mut mapping, old_index, old_len, new_index, *new_len);
                        i += 1;
                    }
                }
                DiffOp::Insert { .. } => {}
            }
            i += 1;
        }

        Self { mapping }
    }

    /// Line mapping for a 1-based old line. Lines outside the old content
    /// are `NotFound`.
    pub fn map_line(&self, old_line: u32) -> LineMapping {
        if old_line == 0 {
            return LineMapping::NotFound;
        }
        self.mapping
            .get(old_line as usize - 1)
            .copied()
            .unwrap_or(LineMapping::NotFound)
    }

    pub fn old_line_count(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_identity(&self) -> bool {
        self.mapping
            .iter()
            .enumerate()
            .all(|(i, m)| *m == LineMapping::Unchanged(i as u32 + 1))
    }
}

fn map_edited(
    mapping: &mut [LineMapping],
    old_index: usize,
    old_len: usize,
    new_index: usize,
    new_len: usize,
) {
    if old_len != new_len {
        return;
    }
    for k in 0..old_len {
        mapping[old_index + k] = LineMapping::Edited((new_index + k + 1) as u32);
    }
}
