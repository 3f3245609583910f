//! Estimator and encoder doubles.

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::catalog::{FragmentId, PlanFragment};
use crate::estimator::{FragmentPartitions, PartitionEstimator};
use crate::params::{ParamEncoder, ParameterSet};
use crate::partition::{PartitionId, PartitionSet};

/// Estimator answering from a fixed fragment -> partitions table.
///
/// Fragments without a route run at the base partition. Every call is
/// recorded so tests can check which fragment sets were estimated.
///
/// ```
/// use batchplan::catalog::FragmentPlacement;
/// use batchplan::estimator::PartitionEstimator;
/// use batchplan::params::ParameterSet;
/// use batchplan::testing::{ScriptedEstimator, chain};
///
/// let estimator = ScriptedEstimator::new().route(2, [0, 3]);
/// let frags = chain(&[1, 2], true, FragmentPlacement::Coordinator);
/// let est = estimator.estimate(&frags, &ParameterSet::default(), 1).unwrap();
/// assert_eq!(est.all.iter().collect::<Vec<_>>(), vec![0, 1, 3]);
/// assert_eq!(estimator.calls(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedEstimator {
    routes: HashMap<FragmentId, Arc<PartitionSet>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<FragmentId>>>,
}

impl ScriptedEstimator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `fragment` to `partitions` regardless of parameters.
    #[must_use]
    pub fn route<I>(mut self, fragment: FragmentId, partitions: I) -> Self
    where
        I: IntoIterator<Item = PartitionId>,
    {
        self.routes
            .insert(fragment, Arc::new(partitions.into_iter().collect()));
        self
    }

    /// Number of `estimate` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fragment ids passed to each `estimate` call, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<FragmentId>> {
        self.requests.lock().clone()
    }
}

impl PartitionEstimator for ScriptedEstimator {
    fn estimate(
        &self,
        fragments: &[PlanFragment],
        _params: &ParameterSet,
        base_partition: PartitionId,
    ) -> Result<FragmentPartitions> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .push(fragments.iter().map(|f| f.id).collect());

        let mut out = FragmentPartitions::default();
        for frag in fragments {
            let partitions = self
                .routes
                .get(&frag.id)
                .cloned()
                .unwrap_or_else(|| Arc::new(PartitionSet::singleton(base_partition)));
            out.insert(frag.id, partitions);
        }
        Ok(out)
    }
}

/// Estimator that always fails.
#[derive(Clone, Debug)]
pub struct FailingEstimator {
    message: String,
}

impl FailingEstimator {
    #[must_use]
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl PartitionEstimator for FailingEstimator {
    fn estimate(
        &self,
        _fragments: &[PlanFragment],
        _params: &ParameterSet,
        _base_partition: PartitionId,
    ) -> Result<FragmentPartitions> {
        Err(anyhow!("{}", self.message))
    }
}

/// Encoder that rejects parameter sets holding more than `max_values` values.
#[derive(Clone, Copy, Debug)]
pub struct FailingEncoder {
    pub max_values: usize,
}

impl ParamEncoder for FailingEncoder {
    fn encode(&self, params: &ParameterSet) -> Result<Vec<u8>> {
        if params.len() > self.max_values {
            return Err(anyhow!(
                "{} parameters exceed the encoder limit of {}",
                params.len(),
                self.max_values
            ));
        }
        Ok(vec![u8::try_from(params.len())?])
    }
}
