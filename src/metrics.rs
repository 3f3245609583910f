//! Planner counters.
//!
//! Every [`BatchPlanner`](crate::planner::BatchPlanner) carries a
//! [`PlannerMetrics`] that counts what it did: plans built, estimator calls,
//! plan graph cache behaviour, and so on. Counters are lock-free and can be
//! read at any time as a JSON snapshot.
//!
//! With the `metrics` feature disabled, [`PlannerMetrics::increment`] is a
//! no-op and every counter reads zero.
//!
//! ```
//! use batchplan::metrics::{Counter, PlannerMetrics};
//!
//! let metrics = PlannerMetrics::new();
//! metrics.increment(Counter::Plans, 1);
//! let snapshot = metrics.snapshot();
//! # #[cfg(feature = "metrics")]
//! assert_eq!(snapshot["plans"], 1);
//! ```

use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicU64, Ordering};

/// A planner counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Calls to `plan` that produced a batch plan.
    Plans,
    /// Plans carrying a misprediction record.
    Mispredictions,
    /// Calls into the partition estimator.
    EstimatorCalls,
    /// Statements re-estimated with their multi-partition fragments.
    EstimateRetries,
    /// Plan graphs found in the cache.
    GraphCacheHits,
    /// Plan graphs built and inserted into the cache.
    GraphBuilds,
    /// Fragment task batches assembled.
    TaskBatches,
    /// Batch plans allocated because the pool was empty.
    PoolCreated,
    /// Batch plans taken from the pool.
    PoolReused,
}

impl Counter {
    pub const ALL: [Counter; 9] = [
        Counter::Plans,
        Counter::Mispredictions,
        Counter::EstimatorCalls,
        Counter::EstimateRetries,
        Counter::GraphCacheHits,
        Counter::GraphBuilds,
        Counter::TaskBatches,
        Counter::PoolCreated,
        Counter::PoolReused,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Counter::Plans => "plans",
            Counter::Mispredictions => "mispredictions",
            Counter::EstimatorCalls => "estimator_calls",
            Counter::EstimateRetries => "estimate_retries",
            Counter::GraphCacheHits => "graph_cache_hits",
            Counter::GraphBuilds => "graph_builds",
            Counter::TaskBatches => "task_batches",
            Counter::PoolCreated => "pool_created",
            Counter::PoolReused => "pool_reused",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
pub struct PlannerMetrics {
    counters: [AtomicU64; Counter::ALL.len()],
}

impl PlannerMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    pub fn increment(&self, counter: Counter, by: u64) {
        #[cfg(feature = "metrics")]
        self.counters[counter.slot()].fetch_add(by, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.slot()].load(Ordering::Relaxed)
    }

    /// All counters as a JSON object keyed by [`Counter::name`].
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let map: Map<String, Value> = Counter::ALL
            .iter()
            .map(|c| (c.name().to_string(), json!(self.get(*c))))
            .collect();
        Value::Object(map)
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
