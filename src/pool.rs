//! Recycling of [`BatchPlan`] working state.
//!
//! A batch plan owns one container per statement slot and a
//! `rounds x partitions` bucket grid, so allocating one per invocation is
//! wasteful. Each planner keeps a bounded stack of idle plans instead.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use crate::metrics::{Counter, PlannerMetrics};
use crate::plan::BatchPlan;

/// Bounded free list of idle [`BatchPlan`]s belonging to one planner.
pub struct BatchPlanPool {
    owner: u64,
    idle: Mutex<Vec<BatchPlan>>,
    max_idle: usize,
    profiling: bool,
    metrics: Arc<PlannerMetrics>,
}

impl BatchPlanPool {
    #[must_use]
    pub fn new(
        owner: u64,
        max_idle: usize,
        profiling: bool,
        metrics: Arc<PlannerMetrics>,
    ) -> Self {
        Self {
            owner,
            idle: Mutex::new(Vec::with_capacity(max_idle.min(16))),
            max_idle,
            profiling,
            metrics,
        }
    }

    /// Pop an idle plan, or build a fresh one with `make`.
    pub fn acquire(&self, make: impl FnOnce() -> BatchPlan) -> BatchPlan {
        let reused = self.idle.lock().pop();
        match reused {
            Some(plan) => {
                if self.profiling {
                    self.metrics.increment(Counter::PoolReused, 1);
                }
                plan
            }
            None => {
                if self.profiling {
                    self.metrics.increment(Counter::PoolCreated, 1);
                }
                make()
            }
        }
    }

    /// Reset `plan` and keep it for reuse unless the pool is full.
    ///
    /// Plans built by another planner are sized for that planner's batch and
    /// are dropped instead.
    pub fn release(&self, mut plan: BatchPlan) {
        if plan.owner() != self.owner {
            warn!(
                owner = plan.owner(),
                pool = self.owner,
                "dropping batch plan released to a foreign planner"
            );
            return;
        }
        plan.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(plan);
        }
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    #[must_use]
    pub fn max_idle(&self) -> usize {
        self.max_idle
    }
}
