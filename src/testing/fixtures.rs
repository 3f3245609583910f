//! Ready-made procedures for common planning scenarios.

use crate::catalog::{FragmentPlacement, PlanFragment, Procedure};
use crate::testing::{ProcedureBuilder, ScriptedEstimator, StatementBuilder, chain, fragment};

/// One replicated read-only lookup with a single fragment (id 1).
#[must_use]
pub fn replicated_lookup(num_partitions: u32) -> Procedure {
    ProcedureBuilder::new("GetWarehouseTax", num_partitions)
        .statement(
            StatementBuilder::new("getTax")
                .sql("SELECT w_tax FROM warehouse WHERE w_id = ?")
                .read_only(true)
                .replicated_only(true)
                .single_partition(chain(&[1], true, FragmentPlacement::Coordinator))
                .build(),
        )
        .build()
}

/// Two read-only statements over partitioned tables.
///
/// `getCustomer` has a single-partition plan (fragment 10). `scanOrders` has a
/// single-partition plan (fragment 20) and a two-round multi-partition plan
/// (fragment 21 feeding fragment 22).
#[must_use]
pub fn order_status(num_partitions: u32) -> Procedure {
    ProcedureBuilder::new("OrderStatus", num_partitions)
        .statement(
            StatementBuilder::new("getCustomer")
                .sql("SELECT * FROM customer WHERE c_id = ?")
                .read_only(true)
                .single_partition(chain(&[10], true, FragmentPlacement::Coordinator))
                .build(),
        )
        .statement(
            StatementBuilder::new("scanOrders")
                .sql("SELECT o_id FROM orders WHERE o_c_id = ?")
                .read_only(true)
                .single_partition(chain(&[20], true, FragmentPlacement::Broadcast))
                .multi_partition(vec![
                    fragment(21, true, FragmentPlacement::Broadcast),
                    PlanFragment {
                        id: 22,
                        read_only: true,
                        input: Some(21),
                        placement: FragmentPlacement::Coordinator,
                    },
                ])
                .build(),
        )
        .build()
}

/// Estimator for [`order_status`] where `scanOrders` touches `partitions`.
#[must_use]
pub fn order_status_estimator(partitions: &[u32]) -> ScriptedEstimator {
    ScriptedEstimator::new()
        .route(20, partitions.iter().copied())
        .route(21, partitions.iter().copied())
}
