//! Non-fatal consistency checks on a built [`Dimension`].
//!
//! Label-based lookups (see `SkeletonFactory`) resolve to the first node with a
//! matching label, so repeated labels are worth knowing about. Repeated labels
//! that share an ancestor are reported separately: the same value is then
//! reachable along two paths and the hierarchy is not a simple tree.

use std::{collections::HashSet, fmt};

use crate::cube::{Status, dimension::Dimension};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// A label is carried by several nodes
    DuplicateLabel,
    /// Nodes sharing a label also share an ancestor
    Diamond,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyIssue {
    pub kind: IssueKind,
    pub label: String,
    pub occurrences: usize,
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IssueKind::DuplicateLabel => write!(
                f,
                "[INFO] label '{}' occurs {} times",
                self.label, self.occurrences
            ),
            IssueKind::Diamond => write!(
                f,
                "[WARN] label '{}' is reachable through {} paths under a common ancestor",
                self.label, self.occurrences
            ),
        }
    }
}

/// Findings of [`Dimension::check_consistency`]
#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub dimension: String,
    pub issues: Vec<ConsistencyIssue>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// `Ok` when clean, `Warning` otherwise
    pub fn status(&self) -> Status {
        if self.is_clean() {
            Status::Ok
        } else {
            Status::Warning
        }
    }

    pub fn has_diamonds(&self) -> bool {
        self.issues.iter().any(|i| i.kind == IssueKind::Diamond)
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "Dimension '{}': no issues found", self.dimension);
        }
        writeln!(
            f,
            "Dimension '{}': {} issue(s)",
            self.dimension,
            self.issues.len()
        )?;
        for issue in &self.issues {
            writeln!(f, "  {issue}")?;
        }
        Ok(())
    }
}

impl Dimension {
    pub fn check_consistency(&self) -> ConsistencyReport {
        let mut issues = Vec::new();

        let mut repeated: Vec<(&str, &[usize])> = self
            .label_occurrences()
            .filter(|(_, idx)| idx.len() > 1)
            .collect();
        repeated.sort_by_key(|(_, idx)| idx[0]);

        for (label, idx) in repeated {
            issues.push(ConsistencyIssue {
                kind: IssueKind::DuplicateLabel,
                label: label.to_string(),
                occurrences: idx.len(),
            });

            // Strict ancestors only; a node trivially overlaps with itself
            let ancestor_sets: Vec<HashSet<usize>> = idx
                .iter()
                .map(|&i| {
                    self.bone_at(i)
                        .ancestors()
                        .skip(1)
                        .map(|a| a.index())
                        .collect()
                })
                .collect();
            let overlapping = ancestor_sets.iter().enumerate().any(|(i, a)| {
                ancestor_sets[i + 1..]
                    .iter()
                    .any(|b| !a.is_disjoint(b))
            });
            if overlapping {
                issues.push(ConsistencyIssue {
                    kind: IssueKind::Diamond,
                    label: label.to_string(),
                    occurrences: idx.len(),
                });
            }
        }

        let report = ConsistencyReport {
            dimension: self.name().to_string(),
            issues,
        };
        if !report.is_clean() {
            tracing::warn!(
                dimension = self.name(),
                issues = report.issues.len(),
                diamonds = report.has_diamonds(),
                "Dimension consistency check found issues"
            );
        }
        report
    }
}
