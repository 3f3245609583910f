//! Error taxonomy for planning and task assembly.
//!
//! Public operations return [`anyhow::Result`]; the typed cause is a
//! [`PlanError`] that callers can recover with
//! `err.downcast_ref::<PlanError>()`.
//!
//! A [`Misprediction`](crate::misprediction::Misprediction) is deliberately
//! not part of this enum: it is an expected planning outcome and is attached
//! to the returned [`BatchPlan`](crate::plan::BatchPlan) as data.

use thiserror::Error;

use crate::partition::PartitionId;

#[derive(Error, Debug)]
pub enum PlanError {
    /// The partition estimator failed for a statement. Fatal for the call.
    #[error("failed to estimate partitions for statement #{stmt_index} ({statement})")]
    Estimation {
        stmt_index: usize,
        statement: String,
        #[source]
        source: anyhow::Error,
    },

    /// A statement's parameters could not be encoded. Fatal for task assembly.
    #[error("failed to serialize parameters for statement #{stmt_index}")]
    Serialization {
        stmt_index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("batch of {size} statements exceeds the maximum batch size of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("statement {statement} has {rounds} fragments, more than the maximum of {max} rounds")]
    TooManyRounds {
        statement: String,
        rounds: usize,
        max: usize,
    },

    #[error("expected {expected} parameter sets, got {actual}")]
    ParameterCountMismatch { expected: usize, actual: usize },

    #[error("partition {partition} is out of range (site has {num_partitions} partitions)")]
    PartitionOutOfRange {
        partition: PartitionId,
        num_partitions: u32,
    },

    #[error("fragments of statement {statement} contain a dependency cycle or a dangling input")]
    MissingFragmentOrdering { statement: String },

    #[error("procedure {procedure} has no statements")]
    EmptyProcedure { procedure: String },

    #[error("statement {statement} is replicated read-only but has no single-partition plan")]
    MissingSinglePartitionPlan { statement: String },

    #[error("procedure {procedure} is compiled for {expected} partitions but the site has {actual}")]
    PartitionCountMismatch {
        procedure: String,
        expected: u32,
        actual: u32,
    },
}
