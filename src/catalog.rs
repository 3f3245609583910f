//! Catalog metadata consumed by the planner.
//!
//! The catalog describes one stored procedure: its fixed batch of statements,
//! and for each statement the physical plan fragments compiled for
//! single-partition and multi-partition execution. These types are plain data
//! and deserialize from JSON, which is how tests and tools describe catalogs.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::PlanError;

/// Catalog identifier of a plan fragment.
pub type FragmentId = u32;

/// Where a fragment executes, as seen by the reference estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentPlacement {
    /// Routed to the partition owning the value of parameter `param_index`.
    Partitioned { param_index: usize },
    /// Runs at the transaction's base partition.
    #[default]
    Coordinator,
    /// Runs at every partition.
    Broadcast,
}

/// One physical, partition-local unit of execution compiled from a statement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanFragment {
    pub id: FragmentId,
    #[serde(default)]
    pub read_only: bool,
    /// Fragment (of the same statement) whose output this fragment consumes.
    #[serde(default)]
    pub input: Option<FragmentId>,
    #[serde(default)]
    pub placement: FragmentPlacement,
}

/// One parameterized SQL statement of a procedure's batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub name: String,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub read_only: bool,
    /// Only touches replicated tables.
    #[serde(default)]
    pub replicated_only: bool,
    /// A single-partition fragment set was compiled for this statement.
    #[serde(default)]
    pub has_single_partition_plan: bool,
    /// Single-partition fragments.
    #[serde(default)]
    pub fragments: Vec<PlanFragment>,
    /// Multi-partition fragments.
    #[serde(default)]
    pub ms_fragments: Vec<PlanFragment>,
}

impl Statement {
    /// The single- or multi-partition fragment set, in catalog order.
    #[must_use]
    pub fn fragments(&self, single_partition: bool) -> &[PlanFragment] {
        if single_partition {
            &self.fragments
        } else {
            &self.ms_fragments
        }
    }

    /// Fragments ordered so every producer precedes its consumer.
    ///
    /// Fragments that become ready at the same time are ordered by id, so the
    /// result is stable across calls.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::MissingFragmentOrdering`] if an input refers to a
    /// fragment outside the set or the inputs form a cycle.
    pub fn sorted_fragments(&self, single_partition: bool) -> Result<Vec<PlanFragment>> {
        let mut pending: Vec<&PlanFragment> = self.fragments(single_partition).iter().collect();
        pending.sort_by_key(|f| f.id);

        let mut placed = HashSet::with_capacity(pending.len());
        let mut ordered = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|f| f.input.is_none_or(|input| placed.contains(&input)));
            if ready.is_empty() {
                bail!(PlanError::MissingFragmentOrdering {
                    statement: self.name.clone(),
                });
            }
            placed.extend(ready.iter().map(|f| f.id));
            ordered.extend(ready.into_iter().cloned());
            pending = blocked;
        }
        Ok(ordered)
    }
}

/// A stored procedure and the partitioning of the site it runs on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    /// System procedures ship their fragments as per-partition system tasks.
    #[serde(default)]
    pub system_proc: bool,
    pub num_partitions: u32,
    pub statements: Vec<Statement>,
}

impl Procedure {
    /// Parse a procedure description from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` does not describe a procedure.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("Failed to parse procedure catalog")
    }
}
