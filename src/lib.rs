//! # Batchplan
//!
//! The **batch query-fragment planner** of a partitioned, main-memory OLTP
//! engine. Given the fixed batch of parameterized statements issued by one
//! stored procedure invocation, it decides per statement whether execution
//! stays on one partition or fans out, builds the dependency graph of the
//! physical fragments to run, detects wrong single-partition predictions, and
//! emits per-partition, per-round task batches for the execution layer.
//!
//! ## Key Features
//!
//! - **Self-correcting placement** - statements are estimated with their
//!   single-partition fragments first and fall back to the multi-partition
//!   fragments at most once
//! - **Replicated read fast path** - read-only statements over replicated
//!   tables never reach the partition estimator
//! - **Shape-keyed graph cache** - the fragment dependency graph depends only on
//!   which statements run single-partitioned, so it is built once per shape
//! - **Misprediction as data** - a wrong speculative routing is reported as a
//!   histogram of touched partitions attached to the plan, not as an error
//! - **Lazy task assembly** - task batches are grouped by round and destination
//!   partition the first time they are requested
//! - **Pooled plans** - per-invocation working state is recycled
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use batchplan::*;
//! use batchplan::testing::{order_status, order_status_estimator, param_sets};
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let ctx = PlannerContext::new(3, PlannerConfig::default());
//! let estimator = Arc::new(order_status_estimator(&[0, 1, 2]));
//! let planner = BatchPlanner::new(&order_status(3), estimator, ctx)?;
//!
//! let mut plan = planner.plan(42, 7, 1, param_sets(&[&[5], &[5]]), false)?;
//! assert!(!plan.has_misprediction());
//! assert!(!plan.is_single_partitioned());
//!
//! for task in plan.fragment_tasks()? {
//!     println!("{task}");
//! }
//! planner.release(plan);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Catalog
//!
//! A [`Procedure`] lists its [`Statement`]s. Each statement carries the
//! [`PlanFragment`]s compiled for single-partition execution and for
//! multi-partition execution; a fragment may consume the output of another
//! fragment of the same statement.
//!
//! ### Estimation
//!
//! The planner asks a [`PartitionEstimator`] which partitions each fragment
//! must visit given the bound [`ParameterSet`] and the base partition.
//! [`HashPartitionEstimator`] routes by a partitioning parameter.
//!
//! ### Plan graph
//!
//! A [`PlanGraph`] has one vertex per fragment occurrence. Each vertex produces
//! a fresh [`DependencyId`] and consumes the previous output in its
//! statement's chain. The graph holds no partitions and no parameters.
//!
//! ### Batch plan
//!
//! A [`BatchPlan`] is the per-invocation result: partition assignments,
//! aggregate read-only/local/single-partition flags, an optional
//! [`Misprediction`], and the [`FragmentTaskBatch`]es built from the graph.
//! Round `r + 1` tasks must not be dispatched before the round `r` results
//! they depend on have arrived; honoring that is the caller's job.
//!
//! ## Feature Flags
//!
//! - `metrics` (default) - planner counters in [`PlannerMetrics`]. Without it
//!   counting compiles to nothing.
//!
//! ## Module Overview
//!
//! - [`planner`] - `BatchPlanner` and the site-wide `PlannerContext`
//! - [`plan`] - `BatchPlan` state and task assembly
//! - [`graph`] / [`graph_cache`] - fragment dependency graphs and their cache
//! - [`estimator`] - the estimation seam and the hash-routing estimator
//! - [`catalog`] - procedures, statements, and fragments
//! - [`task`] - task batches handed to the execution layer
//! - [`misprediction`] - misprediction records and partition histograms
//! - [`pool`], [`partition`], [`dependency`], [`params`] - supporting types
//! - [`config`], [`error`], [`metrics`] - configuration, errors, counters
//! - [`testing`] - builders, estimator doubles, and fixtures

pub mod catalog;
pub mod config;
pub mod dependency;
pub mod error;
pub mod estimator;
pub mod graph;
pub mod graph_cache;
pub mod metrics;
pub mod misprediction;
pub mod params;
pub mod partition;
pub mod plan;
pub mod planner;
pub mod pool;
pub mod task;
pub mod testing;

// General re-exports
pub use catalog::{FragmentId, FragmentPlacement, PlanFragment, Procedure, Statement};
pub use config::{MAX_BATCH_SIZE, MAX_ROUND_SIZE, PlannerConfig};
pub use dependency::{DependencyId, DependencyIdAllocator};
pub use error::PlanError;
pub use estimator::{FragmentPartitions, HashPartitionEstimator, PartitionEstimator};
pub use graph::{PlanEdge, PlanGraph, PlanVertex, VertexKey};
pub use graph_cache::{PlanGraphCache, ShapeKey};
pub use metrics::{Counter, PlannerMetrics};
pub use misprediction::{Misprediction, PartitionHistogram};
pub use params::{ParamEncoder, ParamValue, ParameterSet, PostcardEncoder};
pub use partition::{PartitionId, PartitionSet, PartitionSetCache};
pub use plan::BatchPlan;
pub use planner::{BatchPlanner, PlannerContext};
pub use pool::BatchPlanPool;
pub use task::{FragmentTaskBatch, TaskFragment, TaskType};
