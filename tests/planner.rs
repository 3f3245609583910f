//! End-to-end planning tests.

use anyhow::Result;
use batchplan::testing::*;
use batchplan::*;
use rayon::prelude::*;
use std::sync::Arc;

fn context(num_partitions: u32) -> PlannerContext {
    PlannerContext::new(num_partitions, PlannerConfig::default())
}

/// Two statements whose single-partition plans route their first fragment by
/// parameter 0 and their second by parameter 1. Equal parameters keep a
/// statement on one partition; different ones force the multi-partition plan.
fn two_key_lookup(num_partitions: u32) -> Procedure {
    let statement = |name: &str, base: u32| {
        StatementBuilder::new(name)
            .read_only(true)
            .single_partition(vec![
                fragment(base, true, FragmentPlacement::Partitioned { param_index: 0 }),
                PlanFragment {
                    id: base + 1,
                    read_only: true,
                    input: Some(base),
                    placement: FragmentPlacement::Partitioned { param_index: 1 },
                },
            ])
            .multi_partition(vec![
                fragment(base + 2, true, FragmentPlacement::Broadcast),
                PlanFragment {
                    id: base + 3,
                    read_only: true,
                    input: Some(base + 2),
                    placement: FragmentPlacement::Coordinator,
                },
            ])
            .build()
    };
    ProcedureBuilder::new("TwoKeyLookup", num_partitions)
        .statement(statement("lookupA", 10))
        .statement(statement("lookupB", 20))
        .build()
}

#[test]
fn test_replicated_read_only_single_statement() -> Result<()> {
    let estimator = Arc::new(ScriptedEstimator::new());
    let planner = BatchPlanner::new(&replicated_lookup(4), estimator.clone(), context(4))?;

    let mut plan = planner.plan(1001, 77, 3, param_sets(&[&[1]]), false)?;
    assert!(plan.is_read_only());
    assert!(plan.is_local());
    assert!(plan.is_single_partitioned_and_local());
    assert!(!plan.has_misprediction());
    assert_eq!(estimator.calls(), 0);

    let tasks = plan.fragment_tasks()?;
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.txn_id, 1001);
    assert_eq!(task.client_handle, 77);
    assert_eq!(task.source_partition, 3);
    assert_eq!(task.destination_partition, 3);
    assert_eq!(task.round, 0);
    assert!(task.read_only);
    assert!(task.is_local());
    assert!(!task.final_task);
    assert_eq!(task.task_type, TaskType::UserProc);
    assert_eq!(task.fragment_ids(), vec![1]);
    assert_eq!(task.input_dependency_ids(), vec![None]);
    Ok(())
}

#[test]
fn test_replicated_reads_never_touch_estimator() -> Result<()> {
    let stmt = |name: &str, id| {
        StatementBuilder::new(name)
            .read_only(true)
            .replicated_only(true)
            .single_partition(chain(&[id], true, FragmentPlacement::Coordinator))
            .build()
    };
    let procedure = ProcedureBuilder::new("ReadItems", 8)
        .statement(stmt("getItem", 1))
        .statement(stmt("getDistrict", 2))
        .statement(stmt("getWarehouse", 3))
        .build();
    let estimator = Arc::new(ScriptedEstimator::new());
    let planner = BatchPlanner::new(&procedure, estimator.clone(), context(8))?;

    for (txn, base) in (0..8).enumerate() {
        for predict in [false, true] {
            let plan = planner.plan(txn as u64, 0, base, param_sets(&[&[], &[], &[]]), predict)?;
            assert!(plan.is_single_partitioned());
            assert!(plan.is_local());
            assert!(plan.is_read_only());
            assert!(!plan.has_misprediction());
            assert!(plan.statement_partitions().iter().all(|p| p.is_only(base)));
            planner.release(plan);
        }
    }
    assert_eq!(estimator.calls(), 0);
    Ok(())
}

#[test]
fn test_multi_partition_statement_without_prediction() -> Result<()> {
    let estimator = Arc::new(order_status_estimator(&[0, 1, 2]));
    let planner = BatchPlanner::new(&order_status(3), estimator.clone(), context(3))?;

    let mut plan = planner.plan(42, 7, 1, param_sets(&[&[5], &[5]]), false)?;
    assert!(!plan.has_misprediction());
    assert!(!plan.is_single_partitioned());
    assert!(!plan.is_local());
    assert!(plan.is_read_only());
    assert_eq!(plan.single_partition_bitmap(), &[true, false]);
    assert_eq!(plan.statement_partitions()[0].to_string(), "{1}");
    assert_eq!(plan.statement_partitions()[1].to_string(), "{0, 1, 2}");
    assert_eq!(plan.rounds_len(), 2);

    // getCustomer, then scanOrders single-partition, then its multi-partition retry.
    assert_eq!(estimator.requests(), vec![vec![10], vec![20], vec![21, 22]]);

    let tasks = plan.fragment_tasks()?;
    let layout: Vec<_> = tasks
        .iter()
        .map(|t| (t.round, t.destination_partition, t.fragment_ids()))
        .collect();
    assert_eq!(
        layout,
        vec![
            (0, 0, vec![21]),
            (0, 1, vec![10, 21]),
            (0, 2, vec![21]),
            (1, 1, vec![22]),
        ]
    );
    assert!(tasks.iter().all(|t| t.read_only));

    let producer = tasks[0].fragments[0].output_dependency;
    assert_eq!(tasks[3].fragments[0].input_dependency, Some(producer));
    assert_eq!(tasks[3].stmt_indexes(), vec![1]);
    Ok(())
}

#[test]
fn test_multi_partition_statement_with_prediction_mispredicts() -> Result<()> {
    let estimator = Arc::new(order_status_estimator(&[0, 1, 2]));
    let planner = BatchPlanner::new(&order_status(3), estimator.clone(), context(3))?;

    let mut plan = planner.plan(43, 7, 1, param_sets(&[&[5], &[5]]), true)?;
    let misprediction = plan.misprediction().expect("mispredicted");
    assert_eq!(misprediction.txn_id(), 43);

    let histogram = misprediction.histogram();
    assert_eq!(histogram.get(0), 1);
    assert_eq!(histogram.get(1), 2);
    assert_eq!(histogram.get(2), 1);
    assert_eq!(histogram.total(), 4);

    // No retry with the multi-partition fragments once mispredicted.
    assert_eq!(estimator.requests(), vec![vec![10], vec![20]]);
    assert!(plan.graph().is_none());
    assert!(plan.fragment_tasks()?.is_empty());
    assert_eq!(plan.fragment_count(), 0);
    Ok(())
}

#[test]
fn test_remote_single_partition_statement() -> Result<()> {
    let estimator = Arc::new(order_status_estimator(&[2]));
    let planner = BatchPlanner::new(&order_status(3), estimator, context(3))?;

    let mut plan = planner.plan(1, 0, 1, param_sets(&[&[5], &[5]]), false)?;
    assert!(plan.is_single_partitioned());
    assert!(!plan.is_local());
    assert!(!plan.is_single_partitioned_and_local());

    let layout: Vec<_> = plan
        .fragment_tasks()?
        .iter()
        .map(|t| (t.destination_partition, t.fragment_ids()))
        .collect();
    assert_eq!(layout, vec![(1, vec![10]), (2, vec![20])]);
    assert_eq!(plan.local_task_count(1)?, 1);
    assert_eq!(plan.remote_task_count(1)?, 1);
    Ok(())
}

#[test]
fn test_remote_single_partition_statement_mispredicts() -> Result<()> {
    let estimator = Arc::new(order_status_estimator(&[2]));
    let planner = BatchPlanner::new(&order_status(3), estimator, context(3))?;

    let plan = planner.plan(2, 0, 1, param_sets(&[&[5], &[5]]), true)?;
    let histogram = plan.misprediction().expect("mispredicted").histogram();
    assert_eq!(histogram.partitions().collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(histogram.total(), 2);
    Ok(())
}

#[test]
fn test_misprediction_stops_planning() -> Result<()> {
    let procedure = ProcedureBuilder::new("UpdateStock", 4)
        .statement(
            StatementBuilder::new("readStock")
                .single_partition(chain(&[1], false, FragmentPlacement::Coordinator))
                .build(),
        )
        .statement(
            StatementBuilder::new("writeStock")
                .single_partition(chain(&[2], false, FragmentPlacement::Coordinator))
                .build(),
        )
        .build();
    let estimator = Arc::new(ScriptedEstimator::new().route(1, [0, 3]));
    let planner = BatchPlanner::new(&procedure, estimator.clone(), context(4))?;

    let plan = planner.plan(9, 0, 0, param_sets(&[&[], &[]]), true)?;
    assert!(plan.has_misprediction());
    assert_eq!(estimator.calls(), 1);
    assert!(plan.statement_partitions()[1].is_empty());
    assert!(!plan.is_read_only());
    Ok(())
}

#[test]
fn test_misprediction_histogram_skips_replicated_reads() -> Result<()> {
    let procedure = ProcedureBuilder::new("NewOrder", 4)
        .statement(
            StatementBuilder::new("getItem")
                .read_only(true)
                .replicated_only(true)
                .single_partition(chain(&[1], true, FragmentPlacement::Coordinator))
                .build(),
        )
        .statement(
            StatementBuilder::new("getDistrict")
                .read_only(true)
                .single_partition(chain(&[3], true, FragmentPlacement::Coordinator))
                .build(),
        )
        .statement(
            StatementBuilder::new("updateItem")
                .replicated_only(true)
                .single_partition(chain(&[2], false, FragmentPlacement::Coordinator))
                .build(),
        )
        .build();
    let estimator = Arc::new(ScriptedEstimator::new().route(2, [0]));
    let planner = BatchPlanner::new(&procedure, estimator, context(4))?;

    let plan = planner.plan(5, 0, 2, param_sets(&[&[], &[], &[]]), true)?;
    let histogram = plan.misprediction().expect("mispredicted").histogram();
    // getDistrict at the base partition and updateItem at partition 0; getItem is not counted.
    assert_eq!(histogram.get(2), 1);
    assert_eq!(histogram.get(0), 1);
    assert_eq!(histogram.total(), 2);
    Ok(())
}

#[test]
fn test_graph_reused_across_params_and_base_partitions() -> Result<()> {
    let estimator = Arc::new(HashPartitionEstimator::new(4));
    let planner = BatchPlanner::new(&two_key_lookup(4), estimator, context(4))?;

    let first = planner.plan(1, 0, 1, param_sets(&[&[1, 1], &[2, 2]]), false)?;
    let second = planner.plan(2, 0, 0, param_sets(&[&[3, 3], &[0, 0]]), false)?;
    assert_eq!(first.single_partition_bitmap(), &[true, true]);
    assert!(Arc::ptr_eq(
        first.graph().expect("graph"),
        second.graph().expect("graph")
    ));

    let third = planner.plan(3, 0, 1, param_sets(&[&[1, 2], &[2, 2]]), false)?;
    let fourth = planner.plan(4, 0, 2, param_sets(&[&[0, 3], &[1, 1]]), false)?;
    assert_eq!(third.single_partition_bitmap(), &[false, true]);
    assert!(!Arc::ptr_eq(
        first.graph().expect("graph"),
        third.graph().expect("graph")
    ));
    assert!(Arc::ptr_eq(
        third.graph().expect("graph"),
        fourth.graph().expect("graph")
    ));

    assert_eq!(planner.graph_cache().len(), 2);
    #[cfg(feature = "metrics")]
    {
        assert_eq!(planner.metrics().get(Counter::GraphBuilds), 2);
        assert_eq!(planner.metrics().get(Counter::GraphCacheHits), 2);
        assert_eq!(planner.metrics().get(Counter::EstimateRetries), 2);
    }
    Ok(())
}

#[test]
fn test_round_count_matches_longest_chain() -> Result<()> {
    let procedure = ProcedureBuilder::new("Deep", 2)
        .statement(
            StatementBuilder::new("short")
                .single_partition(chain(&[1], false, FragmentPlacement::Coordinator))
                .build(),
        )
        .statement(
            StatementBuilder::new("deep")
                .single_partition(chain(&[2, 3, 4, 5], false, FragmentPlacement::Coordinator))
                .build(),
        )
        .build();
    let planner = BatchPlanner::new(&procedure, Arc::new(ScriptedEstimator::new()), context(2))?;

    let mut plan = planner.plan(1, 0, 0, param_sets(&[&[], &[]]), true)?;
    assert_eq!(plan.rounds_len(), 4);
    assert_eq!(plan.fragment_count(), 5);
    assert_eq!(plan.fragment_ids(), &[1, 2, 3, 4, 5]);
    assert_eq!(plan.input_dependency_ids()[0], None);
    assert_eq!(plan.input_dependency_ids()[1], None);
    assert_eq!(
        plan.input_dependency_ids()[2],
        Some(plan.output_dependency_ids()[1])
    );

    let rounds: Vec<_> = plan.fragment_tasks()?.iter().map(|t| t.round).collect();
    assert_eq!(rounds, vec![0, 1, 2, 3]);
    Ok(())
}

#[test]
fn test_planners_share_dependency_ids() -> Result<()> {
    let ctx = context(3);
    let a = BatchPlanner::new(&replicated_lookup(3), Arc::new(ScriptedEstimator::new()), ctx.clone())?;
    let b = BatchPlanner::new(
        &order_status(3),
        Arc::new(order_status_estimator(&[0, 1, 2])),
        ctx.clone(),
    )?;

    let plan_a = a.plan(1, 0, 0, param_sets(&[&[]]), false)?;
    let plan_b = b.plan(2, 0, 0, param_sets(&[&[], &[]]), false)?;

    let max_a = plan_a.output_dependency_ids().iter().max().copied();
    let min_b = plan_b.output_dependency_ids().iter().min().copied();
    assert_eq!(max_a, Some(DependencyId::new(9000)));
    assert!(min_b > max_a);
    assert_eq!(ctx.dependency_ids().peek(), DependencyId::new(9004));
    Ok(())
}

#[test]
fn test_first_dependency_id_from_config() -> Result<()> {
    let config = PlannerConfig {
        first_dependency_id: 1,
        ..PlannerConfig::default()
    };
    let planner = BatchPlanner::new(
        &replicated_lookup(2),
        Arc::new(ScriptedEstimator::new()),
        PlannerContext::new(2, config),
    )?;

    let plan = planner.plan(1, 0, 0, param_sets(&[&[]]), false)?;
    assert_eq!(plan.output_dependency_ids(), &[DependencyId::new(1)]);
    Ok(())
}

#[test]
fn test_system_procedure_task_type() -> Result<()> {
    let procedure = ProcedureBuilder::new("@Statistics", 2)
        .system(true)
        .statement(
            StatementBuilder::new("stats")
                .read_only(true)
                .multi_partition(chain(&[1], true, FragmentPlacement::Broadcast))
                .build(),
        )
        .build();
    let planner = BatchPlanner::new(&procedure, Arc::new(HashPartitionEstimator::new(2)), context(2))?;
    assert_eq!(planner.task_type(), TaskType::SysProcPerPartition);

    let mut plan = planner.plan(1, 0, 0, param_sets(&[&[]]), false)?;
    let tasks = plan.fragment_tasks()?;
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.task_type == TaskType::SysProcPerPartition));
    Ok(())
}

#[test]
fn test_estimation_failure_is_fatal() -> Result<()> {
    let planner = BatchPlanner::new(
        &order_status(3),
        Arc::new(FailingEstimator::new("catalog unavailable")),
        context(3),
    )?;

    let err = planner
        .plan(1, 0, 0, param_sets(&[&[1], &[1]]), false)
        .unwrap_err();
    match err.downcast_ref::<PlanError>() {
        Some(PlanError::Estimation {
            stmt_index,
            statement,
            source,
        }) => {
            assert_eq!(*stmt_index, 0);
            assert_eq!(statement, "getCustomer");
            assert_eq!(source.to_string(), "catalog unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The half-built plan went back to the pool.
    assert_eq!(planner.pool().idle_count(), 1);
    Ok(())
}

#[test]
fn test_estimate_outside_site_is_rejected() -> Result<()> {
    let planner = BatchPlanner::new(
        &order_status(3),
        Arc::new(ScriptedEstimator::new().route(10, [7])),
        context(3),
    )?;

    let err = planner
        .plan(1, 0, 0, param_sets(&[&[1], &[1]]), false)
        .unwrap_err();
    let Some(PlanError::Estimation { source, .. }) = err.downcast_ref::<PlanError>() else {
        panic!("expected an estimation error, got {err:?}");
    };
    assert!(matches!(
        source.downcast_ref::<PlanError>(),
        Some(PlanError::PartitionOutOfRange { partition: 7, .. })
    ));
    Ok(())
}

#[test]
fn test_hash_estimator_unroutable_parameter() -> Result<()> {
    let planner = BatchPlanner::new(&two_key_lookup(4), Arc::new(HashPartitionEstimator::new(4)), context(4))?;
    let params = vec![
        ParameterSet::new(vec![ParamValue::Null, ParamValue::Null]),
        ParameterSet::new(vec![ParamValue::Int(1), ParamValue::Int(1)]),
    ];

    let err = planner.plan(1, 0, 0, params, false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::Estimation { stmt_index: 0, .. })
    ));
    Ok(())
}

#[test]
fn test_parameter_count_must_match_batch() -> Result<()> {
    let planner = BatchPlanner::new(&order_status(3), Arc::new(ScriptedEstimator::new()), context(3))?;

    let err = planner.plan(1, 0, 0, param_sets(&[&[1]]), false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::ParameterCountMismatch {
            expected: 2,
            actual: 1
        })
    ));
    Ok(())
}

#[test]
fn test_base_partition_must_exist() -> Result<()> {
    let planner = BatchPlanner::new(&order_status(3), Arc::new(ScriptedEstimator::new()), context(3))?;

    let err = planner
        .plan(1, 0, 3, param_sets(&[&[1], &[1]]), false)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::PartitionOutOfRange { partition: 3, .. })
    ));
    Ok(())
}

#[test]
fn test_constructor_rejects_empty_procedure() {
    let procedure = ProcedureBuilder::new("Nothing", 2).build();
    let err = BatchPlanner::new(&procedure, Arc::new(ScriptedEstimator::new()), context(2))
        .err()
        .expect("empty procedure");
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::EmptyProcedure { .. })
    ));
}

#[test]
fn test_constructor_rejects_oversized_batch() {
    let mut builder = ProcedureBuilder::new("Huge", 2);
    for i in 0..=MAX_BATCH_SIZE {
        builder = builder.statement(
            StatementBuilder::new(&format!("s{i}"))
                .single_partition(chain(&[1], false, FragmentPlacement::Coordinator))
                .build(),
        );
    }
    let err = BatchPlanner::new(&builder.build(), Arc::new(ScriptedEstimator::new()), context(2))
        .err()
        .expect("oversized batch");
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::BatchTooLarge { size: 129, max: 128 })
    ));
}

#[test]
fn test_constructor_rejects_long_chains() {
    let ids: Vec<u32> = (1..=11).collect();
    let procedure = ProcedureBuilder::new("Long", 2)
        .statement(
            StatementBuilder::new("long")
                .multi_partition(chain(&ids, false, FragmentPlacement::Broadcast))
                .build(),
        )
        .build();
    let err = BatchPlanner::new(&procedure, Arc::new(ScriptedEstimator::new()), context(2))
        .err()
        .expect("too many rounds");
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::TooManyRounds {
            rounds: 11,
            max: 10,
            ..
        })
    ));
}

#[test]
fn test_constructor_rejects_partition_count_mismatch() {
    let err = BatchPlanner::new(&order_status(4), Arc::new(ScriptedEstimator::new()), context(3))
        .err()
        .expect("partition mismatch");
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::PartitionCountMismatch {
            expected: 4,
            actual: 3,
            ..
        })
    ));
}

#[test]
fn test_constructor_rejects_replicated_read_without_single_plan() {
    let procedure = ProcedureBuilder::new("Broken", 2)
        .statement(
            StatementBuilder::new("getItem")
                .read_only(true)
                .replicated_only(true)
                .multi_partition(chain(&[1], true, FragmentPlacement::Broadcast))
                .build(),
        )
        .build();
    let err = BatchPlanner::new(&procedure, Arc::new(ScriptedEstimator::new()), context(2))
        .err()
        .expect("missing single-partition plan");
    assert!(matches!(
        err.downcast_ref::<PlanError>(),
        Some(PlanError::MissingSinglePartitionPlan { .. })
    ));
}

#[test]
fn test_concurrent_planning_shares_one_graph() -> Result<()> {
    let estimator = Arc::new(order_status_estimator(&[0, 1, 2]));
    let planner = BatchPlanner::new(&order_status(3), estimator, context(3))?;

    let outputs = (0..64u64)
        .into_par_iter()
        .map(|txn| -> Result<Vec<DependencyId>> {
            let base = u32::try_from(txn % 3)?;
            let mut plan = planner.plan(txn, txn, base, param_sets(&[&[1], &[2]]), false)?;
            let tasks = plan.fragment_tasks()?.len();
            let outputs = plan.output_dependency_ids().to_vec();
            planner.release(plan);
            anyhow::ensure!(tasks >= 4, "expected at least 4 tasks, got {tasks}");
            Ok(outputs)
        })
        .collect::<Result<Vec<_>>>()?;

    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(planner.graph_cache().len(), 1);
    assert!(planner.pool().idle_count() >= 1);
    #[cfg(feature = "metrics")]
    assert_eq!(planner.metrics().get(Counter::Plans), 64);
    Ok(())
}
