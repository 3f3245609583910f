//! Misprediction records.
//!
//! When a batch that was speculatively routed as single-partitioned turns out
//! to need other partitions, the planner attaches a [`Misprediction`] to the
//! plan instead of failing. The histogram of touched partitions tells the
//! caller where the transaction should be re-routed.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FormatResult};
use thiserror::Error;

use crate::partition::{PartitionId, PartitionSet};

/// Touch counts per partition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PartitionHistogram {
    counts: BTreeMap<PartitionId, u64>,
}

impl PartitionHistogram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, partition: PartitionId) {
        *self.counts.entry(partition).or_insert(0) += 1;
    }

    pub fn put_all(&mut self, partitions: &PartitionSet) {
        for p in partitions.iter() {
            self.put(p);
        }
    }

    #[must_use]
    pub fn get(&self, partition: PartitionId) -> u64 {
        self.counts.get(&partition).copied().unwrap_or(0)
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.counts.keys().copied()
    }

    /// Partition with the highest count, lowest id on ties.
    #[must_use]
    pub fn most_touched(&self) -> Option<PartitionId> {
        self.counts
            .iter()
            .max_by(|(pa, ca), (pb, cb)| ca.cmp(cb).then(pb.cmp(pa)))
            .map(|(p, _)| *p)
    }
}

impl Display for PartitionHistogram {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{{")?;
        for (i, (p, c)) in self.counts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}: {c}")?;
        }
        write!(f, "}}")
    }
}

/// The caller's single-partition prediction for a transaction was wrong.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize)]
#[error("txn #{txn_id} was mispredicted as single-partitioned (touched partitions {histogram})")]
pub struct Misprediction {
    txn_id: u64,
    histogram: PartitionHistogram,
}

impl Misprediction {
    #[must_use]
    pub fn new(txn_id: u64, histogram: PartitionHistogram) -> Self {
        Self { txn_id, histogram }
    }

    #[must_use]
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    #[must_use]
    pub fn histogram(&self) -> &PartitionHistogram {
        &self.histogram
    }
}
