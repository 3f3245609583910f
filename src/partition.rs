//! Partition identifiers and the shared table of singleton partition sets.
//!
//! Most statements in an OLTP batch touch exactly one partition, usually the
//! base partition of the transaction. [`PartitionSetCache`] builds one
//! `{p}` set per partition up front so the planner can hand out a shared
//! [`Arc`] instead of allocating a fresh singleton for every statement.

use anyhow::Result;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;

use crate::error::PlanError;

/// Numeric identifier of a partition, dense in `0..num_partitions`.
pub type PartitionId = u32;

/// An ordered set of partitions.
///
/// Ordered so that iteration (and therefore task emission) is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PartitionSet(BTreeSet<PartitionId>);

impl PartitionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn singleton(partition: PartitionId) -> Self {
        Self(BTreeSet::from([partition]))
    }

    pub fn insert(&mut self, partition: PartitionId) -> bool {
        self.0.insert(partition)
    }

    pub fn extend<I: IntoIterator<Item = PartitionId>>(&mut self, partitions: I) {
        self.0.extend(partitions);
    }

    #[must_use]
    pub fn contains(&self, partition: PartitionId) -> bool {
        self.0.contains(&partition)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.0.iter().copied()
    }

    /// True when this set is exactly `{partition}`.
    #[must_use]
    pub fn is_only(&self, partition: PartitionId) -> bool {
        self.0.len() == 1 && self.0.contains(&partition)
    }
}

impl FromIterator<PartitionId> for PartitionSet {
    fn from_iter<I: IntoIterator<Item = PartitionId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PartitionSet {
    type Item = &'a PartitionId;
    type IntoIter = std::collections::btree_set::Iter<'a, PartitionId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for PartitionSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{{")?;
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, "}}")
    }
}

/// Immutable table of size-1 partition sets, one per partition.
///
/// Built once per site and shared by every planner through
/// [`PlannerContext`](crate::planner::PlannerContext).
#[derive(Debug)]
pub struct PartitionSetCache {
    singletons: Vec<Arc<PartitionSet>>,
}

impl PartitionSetCache {
    #[must_use]
    pub fn new(num_partitions: u32) -> Self {
        let singletons = (0..num_partitions)
            .map(|p| Arc::new(PartitionSet::singleton(p)))
            .collect();
        Self { singletons }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn num_partitions(&self) -> u32 {
        self.singletons.len() as u32
    }

    /// Shared `{partition}` set.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::PartitionOutOfRange`] if `partition` is not a
    /// partition of this site.
    pub fn singleton(&self, partition: PartitionId) -> Result<Arc<PartitionSet>> {
        self.singletons
            .get(partition as usize)
            .cloned()
            .ok_or_else(|| {
                PlanError::PartitionOutOfRange {
                    partition,
                    num_partitions: self.num_partitions(),
                }
                .into()
            })
    }
}
