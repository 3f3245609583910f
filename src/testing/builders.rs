//! Fluent builders for catalogs and parameter sets.

use crate::catalog::{FragmentId, FragmentPlacement, PlanFragment, Procedure, Statement};
use crate::params::{ParamValue, ParameterSet};

/// A fragment with no input.
#[must_use]
pub fn fragment(id: FragmentId, read_only: bool, placement: FragmentPlacement) -> PlanFragment {
    PlanFragment {
        id,
        read_only,
        input: None,
        placement,
    }
}

/// Fragments where each one consumes the output of the one before it.
///
/// ```
/// use batchplan::catalog::FragmentPlacement;
/// use batchplan::testing::chain;
///
/// let frags = chain(&[5, 6, 7], true, FragmentPlacement::Coordinator);
/// assert_eq!(frags[0].input, None);
/// assert_eq!(frags[2].input, Some(6));
/// ```
#[must_use]
pub fn chain(ids: &[FragmentId], read_only: bool, placement: FragmentPlacement) -> Vec<PlanFragment> {
    let mut previous = None;
    ids.iter()
        .map(|&id| {
            let frag = PlanFragment {
                id,
                read_only,
                input: previous,
                placement,
            };
            previous = Some(id);
            frag
        })
        .collect()
}

/// A fluent builder for [`Statement`]s.
///
/// # Example
///
/// ```
/// use batchplan::catalog::FragmentPlacement;
/// use batchplan::testing::{StatementBuilder, chain};
///
/// let stmt = StatementBuilder::new("GetItem")
///     .sql("SELECT * FROM item WHERE i_id = ?")
///     .read_only(true)
///     .single_partition(chain(&[1], true, FragmentPlacement::Coordinator))
///     .build();
///
/// assert!(stmt.has_single_partition_plan);
/// assert!(stmt.ms_fragments.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct StatementBuilder {
    stmt: Statement,
}

impl StatementBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            stmt: Statement {
                name: name.to_string(),
                sql: String::new(),
                read_only: false,
                replicated_only: false,
                has_single_partition_plan: false,
                fragments: Vec::new(),
                ms_fragments: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn sql(mut self, sql: &str) -> Self {
        self.stmt.sql = sql.to_string();
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.stmt.read_only = read_only;
        self
    }

    #[must_use]
    pub fn replicated_only(mut self, replicated_only: bool) -> Self {
        self.stmt.replicated_only = replicated_only;
        self
    }

    /// Set the single-partition fragments and mark the plan as present.
    #[must_use]
    pub fn single_partition(mut self, fragments: Vec<PlanFragment>) -> Self {
        self.stmt.has_single_partition_plan = true;
        self.stmt.fragments = fragments;
        self
    }

    #[must_use]
    pub fn multi_partition(mut self, fragments: Vec<PlanFragment>) -> Self {
        self.stmt.ms_fragments = fragments;
        self
    }

    #[must_use]
    pub fn build(self) -> Statement {
        self.stmt
    }
}

/// A fluent builder for [`Procedure`]s.
#[derive(Clone, Debug)]
pub struct ProcedureBuilder {
    procedure: Procedure,
}

impl ProcedureBuilder {
    #[must_use]
    pub fn new(name: &str, num_partitions: u32) -> Self {
        Self {
            procedure: Procedure {
                name: name.to_string(),
                system_proc: false,
                num_partitions,
                statements: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn system(mut self, system_proc: bool) -> Self {
        self.procedure.system_proc = system_proc;
        self
    }

    #[must_use]
    pub fn statement(mut self, stmt: Statement) -> Self {
        self.procedure.statements.push(stmt);
        self
    }

    #[must_use]
    pub fn build(self) -> Procedure {
        self.procedure
    }
}

/// One parameter set per statement, each holding the given values.
#[must_use]
pub fn param_sets(values: &[&[i64]]) -> Vec<ParameterSet> {
    values
        .iter()
        .map(|vs| ParameterSet::new(vs.iter().copied().map(ParamValue::from).collect()))
        .collect()
}
