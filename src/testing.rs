//! Testing utilities for planner users.
//!
//! - **Builders**: [`StatementBuilder`], [`ProcedureBuilder`], [`chain`] and
//!   [`param_sets`] describe catalogs and bound parameters tersely.
//! - **Doubles**: [`ScriptedEstimator`] routes fragments from a fixed table
//!   and records every call; [`FailingEstimator`] and [`FailingEncoder`]
//!   exercise the fatal error paths.
//! - **Fixtures**: procedures for the common planning scenarios.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use batchplan::config::PlannerConfig;
//! use batchplan::planner::{BatchPlanner, PlannerContext};
//! use batchplan::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ctx = PlannerContext::new(4, PlannerConfig::default());
//! let planner = BatchPlanner::new(
//!     &replicated_lookup(4),
//!     Arc::new(ScriptedEstimator::new()),
//!     ctx,
//! )?;
//!
//! let mut plan = planner.plan(1, 0, 3, param_sets(&[&[7]]), false)?;
//! let tasks = plan.fragment_tasks()?;
//! assert_eq!(tasks.len(), 1);
//! assert_eq!(tasks[0].destination_partition, 3);
//! planner.release(plan);
//! # Ok(())
//! # }
//! ```

mod builders;
mod estimators;
mod fixtures;

pub use builders::*;
pub use estimators::*;
pub use fixtures::*;
