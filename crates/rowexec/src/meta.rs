//! Side-channel metadata carried beside a representative row.
//!
//! Aggregates and window functions never look at a single row, they look at
//! a window of member rows and an inclusive frame inside it. GROUP BY
//! attaches a [`GroupMeta`] to each group representative, the WINDOW stage
//! attaches one [`WindowMeta`] per distinct effective window spec.

use std::sync::Arc;

use crate::ast::Expr;
use crate::errors::{Result, evaluation};
use crate::row::Row;

/// Hash of an effective (named-window merged) window spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowKey(pub u64);

/// Inclusive frame bounds into a member window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub start: usize,
    pub end: usize,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.start <= idx && idx <= self.end
    }

    /// Frame covering a whole window, `None` if the window is empty.
    pub fn whole(len: usize) -> Option<Frame> {
        if len == 0 {
            None
        } else {
            Some(Frame {
                start: 0,
                end: len - 1,
            })
        }
    }
}

/// One expanded grouping set.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingSet {
    /// Every distinct grouping expression across all sets, in order of
    /// appearance.
    pub entries: Arc<[Expr]>,
    /// For each entry, whether it is part of this set.
    pub present: Vec<bool>,
}

impl GroupingSet {
    /// Expressions making up this set.
    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.entries
            .iter()
            .zip(self.present.iter())
            .filter_map(|(e, p)| p.then_some(e))
    }
}

/// Metadata for a group representative row.
#[derive(Debug, Clone)]
pub struct GroupMeta {
    /// Rows belonging to the group.
    pub members: Arc<[Row]>,
    pub set: Arc<GroupingSet>,
}

impl GroupMeta {
    pub fn frame(&self) -> Option<Frame> {
        Frame::whole(self.members.len())
    }

    /// `GROUPING(arg)` bit for a single argument: 1 if the argument is a
    /// grouping entry that is not part of this set.
    pub fn grouping_bit(&self, arg: &Expr) -> Result<u64> {
        let idx = self
            .set
            .entries
            .iter()
            .position(|entry| same_grouping_expr(entry, arg))
            .ok_or_else(|| {
                evaluation!("arguments to GROUPING must be grouping expressions of the associated query level, got {arg}")
            })?;
        Ok(if self.set.present[idx] { 0 } else { 1 })
    }
}

/// Check if two expressions refer to the same grouping entry. Columns match
/// if names match and qualifiers don't contradict each other.
pub fn same_grouping_expr(a: &Expr, b: &Expr) -> bool {
    match (a, b) {
        (Expr::Column(a), Expr::Column(b)) => {
            a.name == b.name
                && match (&a.relation, &b.relation) {
                    (Some(x), Some(y)) => x == y,
                    _ => true,
                }
        }
        _ => a == b,
    }
}

/// A sorted window partition shared by every row in it.
#[derive(Debug)]
pub struct WindowPartition {
    /// Member rows in window order.
    pub members: Arc<[Row]>,
    /// Hash of each member's ORDER BY key values.
    pub order_hashes: Vec<u64>,
    /// Index of the first row of each member's peer group.
    pub peer_start: Vec<usize>,
    /// Index of the last row of each member's peer group.
    pub peer_end: Vec<usize>,
    /// Zero-based peer group number of each member.
    pub peer_group: Vec<usize>,
}

impl WindowPartition {
    pub fn new(members: Arc<[Row]>, order_hashes: Vec<u64>) -> Self {
        let len = order_hashes.len();
        let mut peer_start = vec![0; len];
        let mut peer_end = vec![0; len];
        let mut peer_group = vec![0; len];

        let mut run_start = 0;
        let mut group = 0;
        for idx in 0..len {
            if idx > 0 && order_hashes[idx] != order_hashes[idx - 1] {
                for end_idx in run_start..idx {
                    peer_end[end_idx] = idx - 1;
                }
                run_start = idx;
                group += 1;
            }
            peer_start[idx] = run_start;
            peer_group[idx] = group;
        }
        for end_idx in run_start..len {
            peer_end[end_idx] = len - 1;
        }

        WindowPartition {
            members,
            order_hashes,
            peer_start,
            peer_end,
            peer_group,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn num_peer_groups(&self) -> usize {
        self.peer_group.last().map(|g| g + 1).unwrap_or(0)
    }

    /// First row index of peer group `group`.
    pub fn group_start(&self, group: usize) -> Option<usize> {
        self.peer_group.iter().position(|&g| g == group)
    }

    /// Last row index of peer group `group`.
    pub fn group_end(&self, group: usize) -> Option<usize> {
        self.peer_group.iter().rposition(|&g| g == group)
    }
}

/// Window metadata for a single row under a single window spec.
#[derive(Debug, Clone)]
pub struct WindowMeta {
    pub partition: Arc<WindowPartition>,
    /// Position of the row within the sorted partition.
    pub position: usize,
    /// `None` if the frame is empty.
    pub frame: Option<Frame>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::col;

    fn partition(hashes: Vec<u64>) -> WindowPartition {
        let members: Arc<[Row]> = hashes.iter().map(|_| Row::empty()).collect();
        WindowPartition::new(members, hashes)
    }

    #[test]
    fn peer_groups_from_hash_runs() {
        let p = partition(vec![1, 1, 2, 3, 3, 3]);
        assert_eq!(vec![0, 0, 2, 3, 3, 3], p.peer_start);
        assert_eq!(vec![1, 1, 2, 5, 5, 5], p.peer_end);
        assert_eq!(vec![0, 0, 1, 2, 2, 2], p.peer_group);
        assert_eq!(3, p.num_peer_groups());
        assert_eq!(Some(3), p.group_start(2));
        assert_eq!(Some(5), p.group_end(2));
    }

    #[test]
    fn empty_partition() {
        let p = partition(vec![]);
        assert_eq!(0, p.num_peer_groups());
        assert!(p.is_empty());
    }

    #[test]
    fn grouping_set_lists_present_entries() {
        let set = GroupingSet {
            entries: vec![col("a"), col("b"), col("c")].into(),
            present: vec![true, false, false],
        };
        assert_eq!(vec![&col("a")], set.exprs().collect::<Vec<_>>());
    }

    #[test]
    fn grouping_bit_matches_qualified_column() {
        let meta = GroupMeta {
            members: Arc::from(Vec::new()),
            set: Arc::new(GroupingSet {
                entries: vec![col("a"), col("b")].into(),
                present: vec![true, false],
            }),
        };
        assert_eq!(0, meta.grouping_bit(&col("t.a")).unwrap());
        assert_eq!(1, meta.grouping_bit(&col("b")).unwrap());
        assert!(meta.grouping_bit(&col("c")).is_err());
    }
}
