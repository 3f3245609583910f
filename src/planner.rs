//! The batch planner.
//!
//! A [`BatchPlanner`] is bound to one stored procedure. Each call to
//! [`BatchPlanner::plan`] turns the procedure's fixed batch of statements and
//! their bound parameters into a [`BatchPlan`]:
//!
//! 1. **Placement** -- every statement is assigned target partitions.
//!    Read-only statements over replicated tables run at the base partition
//!    without consulting the estimator. Everything else is estimated, first
//!    with the single-partition fragments (when the catalog has them) and, if
//!    those touch more than one partition, once more with the multi-partition
//!    fragments.
//! 2. **Misprediction** -- when the caller routed the batch as
//!    single-partitioned and a statement turns out to be remote or
//!    multi-partitioned, planning stops at that statement and the plan carries
//!    a [`Misprediction`] with a histogram of the partitions touched so far.
//! 3. **Graph** -- otherwise the single/multi-partition choices form a
//!    [`ShapeKey`], and the shared [`PlanGraph`] for that shape is fetched
//!    from the planner's cache or built on first use.
//!
//! Task batches are assembled later, on demand, by
//! [`BatchPlan::fragment_tasks`].
//!
//! Site-wide resources (the singleton partition sets and the dependency id
//! allocator) are passed in through a [`PlannerContext`] so that every planner
//! on a site draws from the same ones.

use anyhow::{Result, bail};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, trace};

use crate::catalog::{PlanFragment, Procedure, Statement};
use crate::config::{MAX_BATCH_SIZE, MAX_ROUND_SIZE, PlannerConfig};
use crate::dependency::DependencyIdAllocator;
use crate::error::PlanError;
use crate::estimator::{FragmentPartitions, PartitionEstimator};
use crate::graph::PlanGraph;
use crate::graph_cache::{PlanGraphCache, ShapeKey};
use crate::metrics::{Counter, PlannerMetrics};
use crate::misprediction::{Misprediction, PartitionHistogram};
use crate::params::{ParamEncoder, ParameterSet, PostcardEncoder};
use crate::partition::{PartitionId, PartitionSetCache};
use crate::plan::BatchPlan;
use crate::pool::BatchPlanPool;
use crate::task::TaskType;

/// Site-wide resources shared by all planners.
#[derive(Clone, Debug)]
pub struct PlannerContext {
    config: PlannerConfig,
    partition_sets: Arc<PartitionSetCache>,
    dependency_ids: Arc<DependencyIdAllocator>,
}

impl PlannerContext {
    /// # Panics
    ///
    /// Panics if `num_partitions` is zero.
    #[must_use]
    pub fn new(num_partitions: u32, config: PlannerConfig) -> Self {
        assert!(num_partitions > 0, "a site needs at least one partition");
        let dependency_ids = DependencyIdAllocator::new(config.first_dependency_id);
        Self {
            config,
            partition_sets: Arc::new(PartitionSetCache::new(num_partitions)),
            dependency_ids: Arc::new(dependency_ids),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    #[must_use]
    pub fn partition_sets(&self) -> &Arc<PartitionSetCache> {
        &self.partition_sets
    }

    #[must_use]
    pub fn dependency_ids(&self) -> &Arc<DependencyIdAllocator> {
        &self.dependency_ids
    }

    #[must_use]
    pub fn num_partitions(&self) -> u32 {
        self.partition_sets.num_partitions()
    }
}

/// Catalog facts about one batch slot, with both fragment orderings resolved
/// up front.
#[derive(Debug)]
struct StatementInfo {
    name: String,
    sql: String,
    read_only: bool,
    replicated_only: bool,
    has_single_partition_plan: bool,
    single_ordering: Arc<[PlanFragment]>,
    multi_ordering: Arc<[PlanFragment]>,
}

impl StatementInfo {
    fn compile(stmt: &Statement) -> Result<Self> {
        let single_ordering: Arc<[PlanFragment]> = stmt.sorted_fragments(true)?.into();
        let multi_ordering: Arc<[PlanFragment]> = stmt.sorted_fragments(false)?.into();
        for ordering in [&single_ordering, &multi_ordering] {
            if ordering.len() > MAX_ROUND_SIZE {
                bail!(PlanError::TooManyRounds {
                    statement: stmt.name.clone(),
                    rounds: ordering.len(),
                    max: MAX_ROUND_SIZE,
                });
            }
        }
        if stmt.replicated_only && stmt.read_only && !stmt.has_single_partition_plan {
            bail!(PlanError::MissingSinglePartitionPlan {
                statement: stmt.name.clone(),
            });
        }
        Ok(Self {
            name: stmt.name.clone(),
            sql: stmt.sql.clone(),
            read_only: stmt.read_only,
            replicated_only: stmt.replicated_only,
            has_single_partition_plan: stmt.has_single_partition_plan,
            single_ordering,
            multi_ordering,
        })
    }

    fn ordering(&self, single_partition: bool) -> &Arc<[PlanFragment]> {
        if single_partition {
            &self.single_ordering
        } else {
            &self.multi_ordering
        }
    }

    fn is_replicated_read_only(&self) -> bool {
        self.replicated_only && self.read_only
    }

    /// Whether this statement's partitions count towards a misprediction
    /// histogram. Replicated reads always land on the base partition.
    fn counts_towards_histogram(&self) -> bool {
        !self.replicated_only || !self.read_only
    }
}

/// Which fragment set a statement is currently being estimated with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    AssumeSingle,
    ConfirmedMulti,
}

#[derive(Clone, Copy, Debug)]
struct StatementOutcome {
    single_partition: bool,
    local: bool,
    mispredicted: bool,
}

static NEXT_PLANNER_ID: AtomicU64 = AtomicU64::new(1);

/// Plans invocations of one stored procedure's statement batch.
///
/// Safe to share between threads; every call to [`plan`](Self::plan) works on
/// its own [`BatchPlan`].
pub struct BatchPlanner {
    id: u64,
    procedure: String,
    task_type: TaskType,
    num_partitions: u32,
    statements: Vec<StatementInfo>,
    estimator: Arc<dyn PartitionEstimator>,
    encoder: Arc<dyn ParamEncoder>,
    ctx: PlannerContext,
    graph_cache: PlanGraphCache,
    pool: BatchPlanPool,
    metrics: Arc<PlannerMetrics>,
}

impl BatchPlanner {
    /// Bind a planner to `procedure`.
    ///
    /// # Errors
    ///
    /// Fails if the procedure is empty, has more than [`MAX_BATCH_SIZE`]
    /// statements, is compiled for a different partition count than the
    /// site, or has a statement whose fragments cannot be ordered, exceed
    /// [`MAX_ROUND_SIZE`] rounds, or lack a required single-partition plan.
    pub fn new(
        procedure: &Procedure,
        estimator: Arc<dyn PartitionEstimator>,
        ctx: PlannerContext,
    ) -> Result<Self> {
        if procedure.statements.is_empty() {
            bail!(PlanError::EmptyProcedure {
                procedure: procedure.name.clone(),
            });
        }
        if procedure.statements.len() > MAX_BATCH_SIZE {
            bail!(PlanError::BatchTooLarge {
                size: procedure.statements.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        if procedure.num_partitions != ctx.num_partitions() {
            bail!(PlanError::PartitionCountMismatch {
                procedure: procedure.name.clone(),
                expected: procedure.num_partitions,
                actual: ctx.num_partitions(),
            });
        }

        let statements = procedure
            .statements
            .iter()
            .map(StatementInfo::compile)
            .collect::<Result<Vec<_>>>()?;

        let id = NEXT_PLANNER_ID.fetch_add(1, Ordering::Relaxed);
        let metrics = Arc::new(PlannerMetrics::new());
        let pool = BatchPlanPool::new(
            id,
            ctx.config.plan_pool_idle,
            ctx.config.pool_profiling,
            Arc::clone(&metrics),
        );
        let task_type = if procedure.system_proc {
            TaskType::SysProcPerPartition
        } else {
            TaskType::UserProc
        };

        debug!(
            procedure = %procedure.name,
            statements = statements.len(),
            num_partitions = ctx.num_partitions(),
            "created batch planner"
        );

        Ok(Self {
            id,
            procedure: procedure.name.clone(),
            task_type,
            num_partitions: ctx.num_partitions(),
            statements,
            estimator,
            encoder: Arc::new(PostcardEncoder),
            ctx,
            graph_cache: PlanGraphCache::new(),
            pool,
            metrics,
        })
    }

    /// Replace the parameter encoder used for task assembly.
    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn ParamEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Plan one invocation of the batch.
    ///
    /// `params` holds one parameter set per statement. When
    /// `predict_single_partitioned` is set, a statement that needs a partition
    /// other than `base_partition` ends planning early and the returned plan
    /// carries a [`Misprediction`] instead of a graph.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ParameterCountMismatch`] or
    /// [`PlanError::PartitionOutOfRange`] for bad arguments, and
    /// [`PlanError::Estimation`] if the estimator fails for any statement.
    pub fn plan(
        &self,
        txn_id: u64,
        client_handle: u64,
        base_partition: PartitionId,
        params: Vec<ParameterSet>,
        predict_single_partitioned: bool,
    ) -> Result<BatchPlan> {
        if params.len() != self.statements.len() {
            bail!(PlanError::ParameterCountMismatch {
                expected: self.statements.len(),
                actual: params.len(),
            });
        }
        self.ctx.partition_sets.singleton(base_partition)?;

        debug!(
            procedure = %self.procedure,
            txn_id,
            base_partition,
            predict_single_partitioned,
            "constructing batch plan"
        );

        let mut plan = self.pool.acquire(|| self.new_plan());
        plan.init(txn_id, client_handle, base_partition, params);

        if let Err(err) = self.populate(&mut plan, predict_single_partitioned) {
            error!(
                procedure = %self.procedure,
                txn_id,
                error = %err,
                "unexpected error when planning batch\n{}",
                self.describe_batch(plan.parameter_sets())
            );
            self.pool.release(plan);
            return Err(err);
        }

        self.metrics.increment(Counter::Plans, 1);
        trace!(%plan, "created batch plan");
        Ok(plan)
    }

    fn new_plan(&self) -> BatchPlan {
        BatchPlan::new(
            self.id,
            self.statements.len(),
            self.num_partitions,
            self.task_type,
            Arc::clone(&self.encoder),
            Arc::clone(&self.metrics),
        )
    }

    fn populate(&self, plan: &mut BatchPlan, predict_single_partitioned: bool) -> Result<()> {
        let mut histogram = None;

        for (stmt_index, info) in self.statements.iter().enumerate() {
            let outcome = self.place_statement(plan, stmt_index, predict_single_partitioned)?;

            plan.frag_lists[stmt_index] =
                Some(Arc::clone(info.ordering(outcome.single_partition)));
            plan.read_only &= info.read_only;
            plan.all_single_partitioned &= outcome.single_partition;
            plan.all_local &= outcome.local;
            plan.single_partition_bitmap[stmt_index] = outcome.single_partition;

            if outcome.mispredicted {
                histogram = Some(self.misprediction_histogram(plan, stmt_index));
                break;
            }
        }

        if let Some(histogram) = histogram {
            let misprediction = Misprediction::new(plan.txn_id, histogram);
            debug!(%misprediction, "batch plan mispredicted");
            self.metrics.increment(Counter::Mispredictions, 1);
            plan.misprediction = Some(misprediction);
            return Ok(());
        }

        let key = ShapeKey::from_bitmap(&plan.single_partition_bitmap);
        let (graph, built) = self
            .graph_cache
            .get_or_build(key, || self.build_graph(key));
        self.metrics.increment(
            if built {
                Counter::GraphBuilds
            } else {
                Counter::GraphCacheHits
            },
            1,
        );
        plan.rounds_len = graph.round_count();
        plan.graph = Some(graph);
        Ok(())
    }

    fn place_statement(
        &self,
        plan: &mut BatchPlan,
        stmt_index: usize,
        predict_single_partitioned: bool,
    ) -> Result<StatementOutcome> {
        let info = &self.statements[stmt_index];
        let base_partition = plan.base_partition;

        if info.is_replicated_read_only() {
            trace!(
                stmt_index,
                statement = %info.name,
                "replicated read-only statement, skipping estimation"
            );
            let base = self.ctx.partition_sets.singleton(base_partition)?;
            for fragment in info.single_ordering.iter() {
                plan.frag_partitions[stmt_index].insert(fragment.id, Arc::clone(&base));
            }
            plan.stmt_partitions[stmt_index].insert(base_partition);
            return Ok(StatementOutcome {
                single_partition: true,
                local: true,
                mispredicted: false,
            });
        }

        let mut placement = if info.has_single_partition_plan {
            Placement::AssumeSingle
        } else {
            Placement::ConfirmedMulti
        };
        loop {
            let single_partition = placement == Placement::AssumeSingle;
            let estimate = self.estimate(plan, stmt_index, single_partition)?;
            plan.frag_partitions[stmt_index].clear();
            plan.frag_partitions[stmt_index].extend(estimate.per_fragment);
            plan.stmt_partitions[stmt_index] = estimate.all;

            let touched = &plan.stmt_partitions[stmt_index];
            let local = touched.is_only(base_partition);
            trace!(stmt_index, ?placement, partitions = %touched, local, "estimated statement");

            let mispredicted = match placement {
                Placement::AssumeSingle if touched.len() > 1 => {
                    if !predict_single_partitioned {
                        self.metrics.increment(Counter::EstimateRetries, 1);
                        placement = Placement::ConfirmedMulti;
                        continue;
                    }
                    true
                }
                _ => !local && predict_single_partitioned,
            };
            return Ok(StatementOutcome {
                single_partition,
                local,
                mispredicted,
            });
        }
    }

    fn estimate(
        &self,
        plan: &BatchPlan,
        stmt_index: usize,
        single_partition: bool,
    ) -> Result<FragmentPartitions> {
        let info = &self.statements[stmt_index];
        self.metrics.increment(Counter::EstimatorCalls, 1);
        self.estimator
            .estimate(
                info.ordering(single_partition),
                &plan.params[stmt_index],
                plan.base_partition,
            )
            .and_then(|estimate| {
                self.check_partitions(&estimate)?;
                Ok(estimate)
            })
            .map_err(|source| {
                PlanError::Estimation {
                    stmt_index,
                    statement: info.name.clone(),
                    source,
                }
                .into()
            })
    }

    fn check_partitions(&self, estimate: &FragmentPartitions) -> Result<()> {
        let touched = estimate
            .per_fragment
            .values()
            .flat_map(|set| set.iter())
            .chain(estimate.all.iter());
        for partition in touched {
            if partition >= self.num_partitions {
                bail!(PlanError::PartitionOutOfRange {
                    partition,
                    num_partitions: self.num_partitions,
                });
            }
        }
        Ok(())
    }

    fn misprediction_histogram(&self, plan: &BatchPlan, last: usize) -> PartitionHistogram {
        let mut histogram = PartitionHistogram::new();
        for (stmt_index, info) in self.statements.iter().enumerate().take(last + 1) {
            if info.counts_towards_histogram() {
                histogram.put_all(&plan.stmt_partitions[stmt_index]);
            }
        }
        histogram
    }

    fn build_graph(&self, key: ShapeKey) -> PlanGraph {
        let chains: Vec<&[PlanFragment]> = self
            .statements
            .iter()
            .enumerate()
            .map(|(i, info)| &**info.ordering(key.is_single_partition(i)))
            .collect();
        PlanGraph::build(&chains, &self.ctx.dependency_ids)
    }

    fn describe_batch(&self, params: &[ParameterSet]) -> String {
        let mut out = String::new();
        for (i, info) in self.statements.iter().enumerate() {
            let bound = params
                .get(i)
                .map_or_else(|| "<unbound>".to_string(), ToString::to_string);
            out.push_str(&format!("[{i:02}] {} {}\n     {bound}\n", info.name, info.sql));
        }
        out
    }

    /// Reset `plan` and return it to this planner's pool.
    ///
    /// A plan built by a different planner is dropped.
    pub fn release(&self, plan: BatchPlan) {
        self.pool.release(plan);
    }

    #[must_use]
    pub fn procedure_name(&self) -> &str {
        &self.procedure
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.statements.len()
    }

    #[must_use]
    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    #[must_use]
    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    #[must_use]
    pub fn context(&self) -> &PlannerContext {
        &self.ctx
    }

    #[must_use]
    pub fn graph_cache(&self) -> &PlanGraphCache {
        &self.graph_cache
    }

    #[must_use]
    pub fn pool(&self) -> &BatchPlanPool {
        &self.pool
    }

    #[must_use]
    pub fn metrics(&self) -> &PlannerMetrics {
        &self.metrics
    }
}
