//! Per-invocation working state of the batch planner.
//!
//! A [`BatchPlan`] is created by a [`BatchPlanner`](crate::planner::BatchPlanner),
//! filled in by one planning pass, expanded into [`FragmentTaskBatch`]es the
//! first time they are requested, and finally reset and returned to the
//! planner's pool. It is owned by the one thread driving the invocation; only
//! the [`PlanGraph`] it points at is shared.
//!
//! Task assembly buckets every graph vertex into `rounds[round][partition]`
//! for each partition its statement targets, then emits one task batch per
//! non-empty bucket, rounds in increasing order and partitions in increasing
//! order within a round.

use anyhow::Result;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter, Result as FormatResult};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::catalog::{FragmentId, PlanFragment};
use crate::config::MAX_ROUND_SIZE;
use crate::dependency::DependencyId;
use crate::error::PlanError;
use crate::graph::PlanGraph;
use crate::metrics::{Counter, PlannerMetrics};
use crate::misprediction::Misprediction;
use crate::params::{ParamEncoder, ParameterSet};
use crate::partition::{PartitionId, PartitionSet};
use crate::task::{FragmentTaskBatch, TaskFragment, TaskType};

/// Working state of one planned batch invocation.
///
/// Shaped for the planner that created it; hand it back with
/// [`BatchPlanner::release`](crate::planner::BatchPlanner::release).
pub struct BatchPlan {
    // Fixed by the owning planner.
    owner: u64,
    batch_size: usize,
    num_partitions: u32,
    task_type: TaskType,
    encoder: Arc<dyn ParamEncoder>,
    metrics: Arc<PlannerMetrics>,

    // Invocation.
    pub(crate) txn_id: u64,
    pub(crate) client_handle: u64,
    pub(crate) base_partition: PartitionId,
    pub(crate) params: Vec<ParameterSet>,
    pub(crate) graph: Option<Arc<PlanGraph>>,
    pub(crate) rounds_len: usize,
    pub(crate) misprediction: Option<Misprediction>,

    // Per statement.
    pub(crate) frag_lists: Vec<Option<Arc<[PlanFragment]>>>,
    pub(crate) stmt_partitions: Vec<PartitionSet>,
    pub(crate) frag_partitions: Vec<HashMap<FragmentId, Arc<PartitionSet>>>,
    pub(crate) single_partition_bitmap: Vec<bool>,
    param_buffers: Vec<Arc<[u8]>>,

    // Round -> partition -> vertex indices into the graph.
    rounds: Vec<Vec<Vec<usize>>>,
    tasks: Vec<FragmentTaskBatch>,
    tasks_built: bool,

    pub(crate) read_only: bool,
    pub(crate) all_local: bool,
    pub(crate) all_single_partitioned: bool,
}

impl BatchPlan {
    pub(crate) fn new(
        owner: u64,
        batch_size: usize,
        num_partitions: u32,
        task_type: TaskType,
        encoder: Arc<dyn ParamEncoder>,
        metrics: Arc<PlannerMetrics>,
    ) -> Self {
        let rounds = (0..MAX_ROUND_SIZE)
            .map(|_| vec![Vec::new(); num_partitions as usize])
            .collect();
        Self {
            owner,
            batch_size,
            num_partitions,
            task_type,
            encoder,
            metrics,
            txn_id: 0,
            client_handle: 0,
            base_partition: 0,
            params: Vec::with_capacity(batch_size),
            graph: None,
            rounds_len: 0,
            misprediction: None,
            frag_lists: vec![None; batch_size],
            stmt_partitions: vec![PartitionSet::new(); batch_size],
            frag_partitions: vec![HashMap::new(); batch_size],
            single_partition_bitmap: vec![false; batch_size],
            param_buffers: Vec::with_capacity(batch_size),
            rounds,
            tasks: Vec::new(),
            tasks_built: false,
            read_only: true,
            all_local: true,
            all_single_partitioned: true,
        }
    }

    pub(crate) fn init(
        &mut self,
        txn_id: u64,
        client_handle: u64,
        base_partition: PartitionId,
        params: Vec<ParameterSet>,
    ) {
        self.txn_id = txn_id;
        self.client_handle = client_handle;
        self.base_partition = base_partition;
        self.params = params;
    }

    /// Id of the planner this plan was built for.
    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }

    /// Clear every per-invocation container so the plan can be reused.
    pub fn reset(&mut self) {
        self.txn_id = 0;
        self.client_handle = 0;
        self.base_partition = 0;
        self.params.clear();
        self.graph = None;
        self.rounds_len = 0;
        self.misprediction = None;
        for i in 0..self.batch_size {
            self.frag_lists[i] = None;
            self.stmt_partitions[i].clear();
            self.frag_partitions[i].clear();
            self.single_partition_bitmap[i] = false;
        }
        self.param_buffers.clear();
        for round in &mut self.rounds {
            for bucket in round {
                bucket.clear();
            }
        }
        self.tasks.clear();
        self.tasks_built = false;
        self.read_only = true;
        self.all_local = true;
        self.all_single_partitioned = true;
    }

    /// True when no per-invocation state is left in the plan.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.params.is_empty()
            && self.graph.is_none()
            && self.misprediction.is_none()
            && self.tasks.is_empty()
            && self.param_buffers.is_empty()
            && self.frag_lists.iter().all(Option::is_none)
            && self.stmt_partitions.iter().all(PartitionSet::is_empty)
            && self.frag_partitions.iter().all(HashMap::is_empty)
            && self
                .rounds
                .iter()
                .all(|round| round.iter().all(Vec::is_empty))
    }

    /// The task batches to execute for this plan, built on first request.
    ///
    /// A mispredicted plan has no graph and yields no tasks.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Serialization`] if a statement's parameters cannot
    /// be encoded. Nothing is cached in that case.
    ///
    /// # Panics
    ///
    /// Panics if a scheduled fragment has no partition assignment, or if a
    /// non-empty graph produces no tasks. Both indicate a planner bug.
    pub fn fragment_tasks(&mut self) -> Result<&[FragmentTaskBatch]> {
        if !self.tasks_built {
            self.build_tasks()?;
            self.tasks_built = true;
        }
        Ok(&self.tasks)
    }

    fn build_tasks(&mut self) -> Result<()> {
        let Some(graph) = self.graph.clone() else {
            return Ok(());
        };
        debug!(
            txn_id = self.txn_id,
            base_partition = self.base_partition,
            "constructing fragment tasks"
        );

        self.encode_parameters()?;

        for (idx, vertex) in graph.vertices().iter().enumerate() {
            let partitions = self.frag_partitions[vertex.stmt_index]
                .get(&vertex.fragment_id)
                .unwrap_or_else(|| {
                    panic!(
                        "no partitions for fragment {} of statement #{} in txn #{}",
                        vertex.fragment_id, vertex.stmt_index, self.txn_id
                    )
                });
            for partition in partitions.iter() {
                self.rounds[vertex.round][partition as usize].push(idx);
            }
        }

        trace!(txn_id = self.txn_id, rounds = self.rounds_len, "grouping fragments by round");
        for round in 0..self.rounds_len {
            for partition in 0..self.num_partitions {
                let bucket = &self.rounds[round][partition as usize];
                if bucket.is_empty() {
                    continue;
                }
                let fragments: Vec<TaskFragment> = bucket
                    .iter()
                    .map(|&idx| {
                        let vertex = &graph.vertices()[idx];
                        TaskFragment {
                            fragment_id: vertex.fragment_id,
                            input_dependency: vertex.input_dependency,
                            output_dependency: vertex.output_dependency,
                            stmt_index: vertex.stmt_index,
                            params: Arc::clone(&self.param_buffers[vertex.stmt_index]),
                        }
                    })
                    .collect();
                let read_only = bucket.iter().all(|&idx| graph.vertices()[idx].read_only);

                let task = FragmentTaskBatch {
                    txn_id: self.txn_id,
                    client_handle: self.client_handle,
                    source_partition: self.base_partition,
                    destination_partition: partition,
                    round,
                    read_only,
                    task_type: self.task_type,
                    final_task: false,
                    fragments,
                };
                trace!(%task, "new fragment task");
                self.tasks.push(task);
            }
        }

        assert!(
            graph.is_empty() || !self.tasks.is_empty(),
            "failed to generate any fragment tasks for txn #{}",
            self.txn_id
        );
        self.metrics
            .increment(Counter::TaskBatches, self.tasks.len() as u64);
        debug!(
            txn_id = self.txn_id,
            tasks = self.tasks.len(),
            "created fragment tasks"
        );
        Ok(())
    }

    fn encode_parameters(&mut self) -> Result<()> {
        self.param_buffers.clear();
        for (stmt_index, params) in self.params.iter().enumerate() {
            match self.encoder.encode(params) {
                Ok(bytes) => self.param_buffers.push(Arc::from(bytes)),
                Err(source) => {
                    error!(
                        txn_id = self.txn_id,
                        stmt_index,
                        error = %source,
                        "failed to serialize parameters"
                    );
                    self.param_buffers.clear();
                    return Err(PlanError::Serialization { stmt_index, source }.into());
                }
            }
        }
        Ok(())
    }

    /// Number of task batches bound for `partition`.
    ///
    /// # Errors
    ///
    /// Propagates task assembly failures.
    pub fn local_task_count(&mut self, partition: PartitionId) -> Result<usize> {
        Ok(self
            .fragment_tasks()?
            .iter()
            .filter(|t| t.destination_partition == partition)
            .count())
    }

    /// Number of task batches bound anywhere but `partition`.
    ///
    /// # Errors
    ///
    /// Propagates task assembly failures.
    pub fn remote_task_count(&mut self, partition: PartitionId) -> Result<usize> {
        Ok(self
            .fragment_tasks()?
            .iter()
            .filter(|t| t.destination_partition != partition)
            .count())
    }

    #[must_use]
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    #[must_use]
    pub fn client_handle(&self) -> u64 {
        self.client_handle
    }

    #[must_use]
    pub fn base_partition(&self) -> PartitionId {
        self.base_partition
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn parameter_sets(&self) -> &[ParameterSet] {
        &self.params
    }

    /// The shared graph for this plan's shape. `None` on misprediction.
    #[must_use]
    pub fn graph(&self) -> Option<&Arc<PlanGraph>> {
        self.graph.as_ref()
    }

    #[must_use]
    pub fn rounds_len(&self) -> usize {
        self.rounds_len
    }

    #[must_use]
    pub fn has_misprediction(&self) -> bool {
        self.misprediction.is_some()
    }

    #[must_use]
    pub fn misprediction(&self) -> Option<&Misprediction> {
        self.misprediction.as_ref()
    }

    /// Partitions touched by each statement.
    #[must_use]
    pub fn statement_partitions(&self) -> &[PartitionSet] {
        &self.stmt_partitions
    }

    /// Partitions assigned to `fragment` of statement `stmt_index`.
    #[must_use]
    pub fn fragment_partitions(
        &self,
        stmt_index: usize,
        fragment: FragmentId,
    ) -> Option<&Arc<PartitionSet>> {
        self.frag_partitions.get(stmt_index)?.get(&fragment)
    }

    /// Single-partition flag of each statement, i.e. the plan's shape.
    #[must_use]
    pub fn single_partition_bitmap(&self) -> &[bool] {
        &self.single_partition_bitmap
    }

    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.graph.as_ref().map_or(0, |g| g.vertex_count())
    }

    #[must_use]
    pub fn fragment_ids(&self) -> &[FragmentId] {
        self.graph.as_ref().map_or(&[], |g| g.fragment_ids())
    }

    #[must_use]
    pub fn input_dependency_ids(&self) -> &[Option<DependencyId>] {
        self.graph.as_ref().map_or(&[], |g| g.input_ids())
    }

    #[must_use]
    pub fn output_dependency_ids(&self) -> &[DependencyId] {
        self.graph.as_ref().map_or(&[], |g| g.output_ids())
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.all_local
    }

    #[must_use]
    pub fn is_single_partitioned(&self) -> bool {
        self.all_single_partitioned
    }

    #[must_use]
    pub fn is_single_partitioned_and_local(&self) -> bool {
        self.all_single_partitioned && self.all_local
    }
}

impl Debug for BatchPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.debug_struct("BatchPlan")
            .field("txn_id", &self.txn_id)
            .field("client_handle", &self.client_handle)
            .field("base_partition", &self.base_partition)
            .field("batch_size", &self.batch_size)
            .field("num_partitions", &self.num_partitions)
            .field("task_type", &self.task_type)
            .field("rounds_len", &self.rounds_len)
            .field("misprediction", &self.misprediction)
            .field("read_only", &self.read_only)
            .field("all_local", &self.all_local)
            .field("all_single_partitioned", &self.all_single_partitioned)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Display for BatchPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(
            f,
            "┌─ BATCH PLAN txn #{} ─────────────────────────────────────────┐",
            self.txn_id
        )?;
        writeln!(f, "│ Base Partition:    {:>10}", self.base_partition)?;
        writeln!(f, "│ Read Only:         {:>10}", self.read_only)?;
        writeln!(f, "│ All Local:         {:>10}", self.all_local)?;
        writeln!(f, "│ All Single-Sited:  {:>10}", self.all_single_partitioned)?;
        writeln!(f, "│ Rounds:            {:>10}", self.rounds_len)?;
        if let Some(m) = &self.misprediction {
            writeln!(f, "│ Mispredicted:      {}", m.histogram())?;
        }
        for (i, partitions) in self.stmt_partitions.iter().enumerate() {
            if self.frag_lists[i].is_none() {
                continue;
            }
            let shape = if self.single_partition_bitmap[i] {
                "SP"
            } else {
                "MP"
            };
            writeln!(f, "│ [{i:02}] {shape} {partitions}")?;
        }
        if !self.tasks.is_empty() {
            writeln!(
                f,
                "├──────────────────────────────────────────────────────────────┤"
            )?;
            for task in &self.tasks {
                writeln!(f, "│ {task}")?;
            }
        }
        write!(
            f,
            "└──────────────────────────────────────────────────────────────┘"
        )
    }
}
