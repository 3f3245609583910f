//! Partition estimation.
//!
//! The planner never decides on its own where a fragment runs. It asks a
//! [`PartitionEstimator`], handing over the fragment set it is considering
//! (single- or multi-partition variant), the bound parameters, and the base
//! partition; the estimator answers with the partitions each fragment must
//! visit.
//!
//! [`HashPartitionEstimator`] is the reference implementation driven by each
//! fragment's [`FragmentPlacement`].

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{FragmentId, FragmentPlacement, PlanFragment};
use crate::params::{ParamValue, ParameterSet};
use crate::partition::{PartitionId, PartitionSet};

/// Target partitions for one statement's fragments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FragmentPartitions {
    /// Partitions per fragment.
    pub per_fragment: HashMap<FragmentId, Arc<PartitionSet>>,
    /// Union over all fragments.
    pub all: PartitionSet,
}

impl FragmentPartitions {
    /// Record `partitions` for `fragment` and fold them into the union.
    pub fn insert(&mut self, fragment: FragmentId, partitions: Arc<PartitionSet>) {
        self.all.extend(partitions.iter());
        self.per_fragment.insert(fragment, partitions);
    }

    pub fn clear(&mut self) {
        self.per_fragment.clear();
        self.all.clear();
    }
}

/// Maps fragments plus bound parameters to target partitions.
pub trait PartitionEstimator: Send + Sync {
    /// # Errors
    ///
    /// Any error is fatal to the planning call that asked.
    fn estimate(
        &self,
        fragments: &[PlanFragment],
        params: &ParameterSet,
        base_partition: PartitionId,
    ) -> Result<FragmentPartitions>;
}

/// Routes partitioned fragments by their partitioning parameter.
///
/// Integers map to `value mod num_partitions`; text maps through a 32-bit
/// FNV-1a hash first. Any other value type cannot be routed.
#[derive(Clone, Debug)]
pub struct HashPartitionEstimator {
    num_partitions: u32,
}

impl HashPartitionEstimator {
    /// # Panics
    ///
    /// Panics if `num_partitions` is zero.
    #[must_use]
    pub fn new(num_partitions: u32) -> Self {
        assert!(num_partitions > 0, "a site needs at least one partition");
        Self { num_partitions }
    }

    /// The partition owning `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` has no partitioning function.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn partition_for(&self, value: &ParamValue) -> Result<PartitionId> {
        let n = i64::from(self.num_partitions);
        match value {
            ParamValue::Int(v) => Ok(v.rem_euclid(n) as PartitionId),
            ParamValue::Text(s) => Ok(fnv1a(s.as_bytes()) % self.num_partitions),
            other => Err(anyhow!("cannot route on parameter value {other}")),
        }
    }

    fn all_partitions(&self) -> PartitionSet {
        (0..self.num_partitions).collect()
    }
}

impl PartitionEstimator for HashPartitionEstimator {
    fn estimate(
        &self,
        fragments: &[PlanFragment],
        params: &ParameterSet,
        base_partition: PartitionId,
    ) -> Result<FragmentPartitions> {
        let mut out = FragmentPartitions::default();
        for fragment in fragments {
            let partitions = match fragment.placement {
                FragmentPlacement::Coordinator => PartitionSet::singleton(base_partition),
                FragmentPlacement::Broadcast => self.all_partitions(),
                FragmentPlacement::Partitioned { param_index } => {
                    let value = params.get(param_index).ok_or_else(|| {
                        anyhow!(
                            "fragment {} routes on parameter {param_index} but only {} were bound",
                            fragment.id,
                            params.len()
                        )
                    })?;
                    PartitionSet::singleton(self.partition_for(value)?)
                }
            };
            out.insert(fragment.id, Arc::new(partitions));
        }
        Ok(out)
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5_u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}
