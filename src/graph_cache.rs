//! Cache of plan graphs keyed by batch shape.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::MAX_BATCH_SIZE;
use crate::graph::PlanGraph;

/// Which statements of a batch were planned single-partitioned.
///
/// Bit `i` is set when statement `i` runs single-partitioned. A batch holds at
/// most [`MAX_BATCH_SIZE`] statements, so the bitmap fits in a `u128`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    bits: u128,
    len: u8,
}

impl ShapeKey {
    /// # Panics
    ///
    /// Panics if `bitmap` is longer than [`MAX_BATCH_SIZE`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_bitmap(bitmap: &[bool]) -> Self {
        assert!(
            bitmap.len() <= MAX_BATCH_SIZE,
            "shape of {} statements exceeds the maximum batch size",
            bitmap.len()
        );
        let bits = bitmap
            .iter()
            .enumerate()
            .filter(|(_, single)| **single)
            .fold(0u128, |acc, (i, _)| acc | (1u128 << i));
        Self {
            bits,
            len: bitmap.len() as u8,
        }
    }

    #[must_use]
    pub fn is_single_partition(&self, stmt_index: usize) -> bool {
        stmt_index < usize::from(self.len) && self.bits & (1u128 << stmt_index) != 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Shared, lazily populated map from [`ShapeKey`] to [`PlanGraph`].
///
/// Lookup-or-build runs under a single lock. Builds happen once per distinct
/// shape, so contention is limited to the first invocations of each shape.
#[derive(Debug, Default)]
pub struct PlanGraphCache {
    graphs: Mutex<HashMap<ShapeKey, Arc<PlanGraph>>>,
}

impl PlanGraphCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the graph for `key`, building and inserting it with `build` if
    /// absent. The flag is `true` when this call built the graph.
    pub fn get_or_build<F>(&self, key: ShapeKey, build: F) -> (Arc<PlanGraph>, bool)
    where
        F: FnOnce() -> PlanGraph,
    {
        let mut graphs = self.graphs.lock();
        if let Some(graph) = graphs.get(&key) {
            return (Arc::clone(graph), false);
        }
        let graph = Arc::new(build());
        debug!(
            ?key,
            vertices = graph.vertex_count(),
            rounds = graph.round_count(),
            "built plan graph"
        );
        graphs.insert(key, Arc::clone(&graph));
        (graph, true)
    }

    #[must_use]
    pub fn get(&self, key: &ShapeKey) -> Option<Arc<PlanGraph>> {
        self.graphs.lock().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.graphs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graphs.lock().is_empty()
    }

    pub fn clear(&self) {
        self.graphs.lock().clear();
    }
}
